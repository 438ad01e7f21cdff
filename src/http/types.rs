//! Status codes and byte-level helpers shared by the parser and serializer

use crate::errors::Error;

#[inline]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

/// Drops one trailing `\r`.
#[inline]
pub(crate) fn trim_cr(line: &[u8]) -> &[u8] {
    match line {
        [rest @ .., b'\r'] => rest,
        _ => line,
    }
}

/// Drops leading spaces and newlines.
#[inline]
pub(crate) fn trim_prefix(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|b| !matches!(b, b' ' | b'\n'))
        .unwrap_or(value.len());

    &value[start..]
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:literal, $str:literal);
    )+) => {
        /// Response status codes this server knows how to send.
        ///
        /// The set is closed: [`StatusCode::from_u16`] rejects anything else
        /// instead of inventing a reason phrase.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            /// Looks `code` up in the table.
            pub const fn from_u16(code: u16) -> Result<Self, Error> {
                match code {
                    $($num => Ok(StatusCode::$name),)+
                    _ => Err(Error::InvalidStatusCode(code)),
                }
            }

            /// The reason phrase, e.g. `"Not Found"`.
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            // Status line as bytes, e.g. `b"HTTP/1.1 200 OK\r\n"`.
            #[inline]
            pub(crate) const fn first_line(&self) -> &'static [u8] {
                match self { $(
                    StatusCode::$name => concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes(),
                )+ }
            }
        }
    }
}

set_status_codes! {
    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    /// No longer used, kept for old clients.
    SwitchProxy = (306, "Switch Proxy");
    TemporaryRedirect = (307, "Temporary Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    ProxyAuthenticationRequired = (407, "Proxy Authentication Required");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    LengthRequired = (411, "Length Required");
    RequestEntityTooLarge = (413, "Request Entity Too Large");
    RequestUriTooLong = (414, "Request-URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    ExpectationFailed = (417, "Expectation Failed");
    /// Short and stout.
    Teapot = (418, "Teapot");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    #[inline]
    fn try_from(code: u16) -> Result<Self, Error> {
        Self::from_u16(code)
    }
}

impl From<StatusCode> for u16 {
    #[inline]
    fn from(code: StatusCode) -> u16 {
        code as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        #[rustfmt::skip]
        let cases = [
            (200, Some("HTTP/1.1 200 OK\r\n")),
            (206, Some("HTTP/1.1 206 Partial Content\r\n")),
            (306, Some("HTTP/1.1 306 Switch Proxy\r\n")),
            (404, Some("HTTP/1.1 404 Not Found\r\n")),
            (418, Some("HTTP/1.1 418 Teapot\r\n")),
            (505, Some("HTTP/1.1 505 HTTP Version Not Supported\r\n")),
            (100, None),
            (203, None),
            (305, None),
            (308, None),
            (410, None),
            (412, None),
            (416, None),
            (506, None),
            (999, None),
        ];

        for (code, line) in cases {
            match (StatusCode::from_u16(code), line) {
                (Ok(status), Some(line)) => {
                    assert_eq!(status.first_line(), line.as_bytes());
                    assert_eq!(u16::from(status), code);
                }
                (Err(Error::InvalidStatusCode(c)), None) => assert_eq!(c, code),
                (got, _) => panic!("{code}: unexpected {got:?}"),
            }
        }
    }

    #[test]
    fn teapot() {
        assert_eq!(StatusCode::try_from(418).unwrap().reason(), "Teapot");
        assert!(matches!(
            StatusCode::try_from(999),
            Err(Error::InvalidStatusCode(999))
        ));
    }

    #[test]
    fn table_size() {
        let known = (0..=999u16)
            .filter(|c| StatusCode::from_u16(*c).is_ok())
            .count();
        assert_eq!(known, 35);
    }

    #[test]
    fn helpers() {
        assert_eq!(slice_to_usize(b"1234"), Some(1234));
        assert_eq!(slice_to_usize(b""), None);
        assert_eq!(slice_to_usize(b"12a"), None);
        assert_eq!(slice_to_usize(b"-1"), None);
        assert_eq!(slice_to_usize(b"99999999999999999999999"), None);

        assert_eq!(trim_cr(b"abc\r"), b"abc");
        assert_eq!(trim_cr(b"abc"), b"abc");
        assert_eq!(trim_cr(b"\r"), b"");

        assert_eq!(trim_prefix(b"  \nvalue "), b"value ");
        assert_eq!(trim_prefix(b"   "), b"");
    }
}
