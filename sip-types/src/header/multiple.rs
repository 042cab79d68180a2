//! [`DecodeValues`]/[`ExtendValues`] impls for `Vec<H>`, allowing every typed
//! header to be read/written either as a single value or as the full
//! comma-separated / multi-line list.

use super::headers::OneOrMore;
use super::{DecodeValues, ExtendValues};
use crate::print::PrintCtx;
use bytesstr::BytesStr;
use internal::IResult;

impl<H: DecodeValues> DecodeValues for Vec<H> {
    fn decode<'i, I>(values: &mut I) -> IResult<&'i str, Self>
    where
        I: Iterator<Item = &'i BytesStr>,
    {
        let mut result = Vec::new();

        for value in values {
            let mut current = value.clone();

            loop {
                let (rem, item) = H::decode(&mut std::iter::once(&current))?;
                result.push(item);

                let rem = rem.trim_start_matches(|c: char| c == ',' || c.is_whitespace());

                if rem.is_empty() {
                    break;
                }

                current = current.slice_ref(rem);
            }
        }

        Ok(("", result))
    }
}

impl<H: ExtendValues> ExtendValues for Vec<H> {
    fn extend_values(&self, ctx: PrintCtx<'_>, values: &mut OneOrMore) {
        for header in self {
            header.extend_values(ctx, values);
        }
    }

    fn create_values(&self, ctx: PrintCtx<'_>) -> OneOrMore {
        let mut iter = self.iter();

        let Some(first) = iter.next() else {
            return OneOrMore::One(BytesStr::from_static(""));
        };

        let mut values = first.create_values(ctx);

        for header in iter {
            header.extend_values(ctx, &mut values);
        }

        values
    }
}
