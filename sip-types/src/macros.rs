/// Implements `FromStr` for types that implement [`crate::parse::Parse`],
/// using the string itself as the backing buffer.
#[macro_export]
macro_rules! impl_from_str {
    ($ty:ty) => {
        impl std::str::FromStr for $ty {
            type Err = $crate::HeaderError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                use $crate::_private_reexport::Finish;

                let src = bytes::Bytes::copy_from_slice(s.as_bytes());

                let (rem, value) = <$ty as $crate::parse::Parse>::parse(&src)(s)
                    .finish()
                    .map_err(|_| $crate::HeaderError::malformed::<$ty>())?;

                if !rem.is_empty() {
                    return Err($crate::HeaderError::malformed::<$ty>());
                }

                Ok(value)
            }
        }
    };
}

macro_rules! encode_set {
    ($fn:ident, $name:ident) => {
        lazy_static::lazy_static! {
            static ref $name: AsciiSet = {
                let mut set = percent_encoding::CONTROLS.add(0);

                for b in 0..=127u8 {
                    if !$fn(b as char) {
                        set = set.add(b);
                    }
                }

                set
            };
        }
    };
}
