use bytes::Bytes;
use internal::Finish;
use sip_types::msg::{Line, MessageLine, PullParser};
use sip_types::parse::Parse;
use sip_types::{Headers, Name};
use std::str::from_utf8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the given input was invalid in this context and couldn't be parsed")]
    FailedToParse,
}

pub enum CompleteItem {
    KeepAliveRequest,
    KeepAliveResponse,
    Sip {
        line: MessageLine,
        headers: Headers,
        body: Bytes,
        buffer: Bytes,
    },
}

/// Parse a single complete datagram (one UDP packet) into a SIP message.
///
/// Unlike the streaming decoder this never has to deal with partial input -
/// the whole buffer is either a keepalive, a complete message or garbage.
pub fn parse_complete(bytes: &[u8]) -> Result<CompleteItem, Error> {
    if bytes == b"\r\n\r\n" {
        return Ok(CompleteItem::KeepAliveRequest);
    } else if bytes == b"\r\n" {
        return Ok(CompleteItem::KeepAliveResponse);
    }

    let buffer = Bytes::copy_from_slice(bytes);

    let mut parser = PullParser::new(&buffer, 0);

    let mut message_line = None;
    let mut headers = Headers::new();
    let mut content_len = 0;

    for item in &mut parser {
        let line = match item {
            Ok(line) => line,
            Err(_) => {
                log::warn!("Incoming SIP message is incomplete");
                return Err(Error::FailedToParse);
            }
        };

        let line = from_utf8(line).map_err(|_| {
            log::warn!("Incoming SIP message contained invalid UTF8 in header line");
            Error::FailedToParse
        })?;

        if message_line.is_none() {
            match MessageLine::parse(&buffer)(line) {
                Ok((_, line)) => message_line = Some(line),
                Err(_) => {
                    log::warn!(
                        "Incoming SIP message contained invalid Request/Status Line: {:?}",
                        line
                    );
                    return Err(Error::FailedToParse);
                }
            }
        } else {
            match Line::parse(&buffer, line).finish() {
                Ok((_, line)) => {
                    if line.name == Name::CONTENT_LENGTH {
                        content_len = line.value.trim().parse().unwrap_or(0);
                    }

                    headers.insert(line.name, line.value);
                }
                Err(e) => {
                    log::error!("Incoming SIP message has malformed header line, {e}");
                    return Err(Error::FailedToParse);
                }
            }
        }
    }

    let head_end = parser.head_end();

    let body = if content_len == 0 {
        if head_end == buffer.len() {
            Bytes::new()
        } else {
            // no (usable) content-length given, guess the body length from the datagram
            buffer.slice(head_end..)
        }
    } else if buffer.len() >= head_end + content_len {
        buffer.slice(head_end..head_end + content_len)
    } else {
        log::warn!("Incoming SIP message has an incomplete body");
        return Err(Error::FailedToParse);
    };

    Ok(CompleteItem::Sip {
        line: message_line.ok_or(Error::FailedToParse)?,
        headers,
        body,
        buffer,
    })
}
