use crate::{Block, ClickEvent, Header, ProtocolError};

/// One logical line of an i3bar-protocol output stream, as emitted by an
/// upstream status producer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The `{"version":…}` handshake object.
    Header(Header),
    /// The lone `[` opening the infinite array.
    ArrayOpen,
    /// One status line: an array of blocks, possibly comma-prefixed.
    Blocks(Vec<Block>),
    /// The closing `]` of a producer that terminated cleanly.
    ArrayClose,
    /// A blank line. Skipped.
    Empty,
}

/// Parse one line of a producer's stdout.
///
/// Producers separate status arrays with commas, either at the end of the
/// previous line or the start of the next one, so a leading comma is
/// stripped before looking at the payload.
pub fn parse_output_line(line: &str) -> Result<Frame, ProtocolError> {
    let trimmed = line.trim().trim_start_matches(',').trim_start();
    match trimmed {
        "" => Ok(Frame::Empty),
        "[" => Ok(Frame::ArrayOpen),
        "]" => Ok(Frame::ArrayClose),
        s if s.starts_with('{') => {
            let header = serde_json::from_str(s).map_err(|e| ProtocolError::json("producer header", e))?;
            Ok(Frame::Header(header))
        }
        s if s.starts_with('[') => {
            let blocks = serde_json::from_str(s).map_err(|e| ProtocolError::json("status line", e))?;
            Ok(Frame::Blocks(blocks))
        }
        other => Err(ProtocolError::UnexpectedLine(other.to_string())),
    }
}

/// Parse one line of the click-event stream on stdin.
///
/// The stream starts with a `[` token which carries no event; that line and
/// blank lines yield `None`. Event objects may be comma-prefixed.
pub fn parse_click_line(line: &str) -> Result<Option<ClickEvent>, ProtocolError> {
    let trimmed = line.trim().trim_start_matches(',').trim_start();
    match trimmed {
        "" | "[" | "]" => Ok(None),
        s => {
            let event = serde_json::from_str(s).map_err(|e| ProtocolError::json("click event", e))?;
            Ok(Some(event))
        }
    }
}
