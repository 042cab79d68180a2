use crate::header::name::Name;
use bytesstr::BytesStr;

csv_header! {
    /// `Supported` header, contains only one option-tag.
    /// To get all supported extensions use `Vec<Supported>`.
    Supported,
    BytesStr,
    Name::SUPPORTED
}

csv_header! {
    /// `Require` header, contains only one option-tag.
    /// To get all required extensions use `Vec<Require>`.
    Require,
    BytesStr,
    Name::REQUIRE
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Headers;

    const SUPPORTED_100REL: Supported = Supported(BytesStr::from_static("100rel"));
    const SUPPORTED_TIMER: Supported = Supported(BytesStr::from_static("timer"));

    #[test]
    fn print_supported_multiple_vec() {
        let supported = vec![SUPPORTED_100REL, SUPPORTED_TIMER];

        let mut headers = Headers::new();
        headers.insert_named(&supported);

        assert_eq!(headers.to_string(), "Supported: 100rel, timer\r\n");
    }

    #[test]
    fn parse_supported_multiple_vec() {
        let mut headers = Headers::new();
        headers.insert(Name::SUPPORTED, "100rel, timer");

        let supported: Vec<Supported> = headers.get_named().unwrap();
        assert_eq!(supported, vec![SUPPORTED_100REL, SUPPORTED_TIMER]);
    }
}
