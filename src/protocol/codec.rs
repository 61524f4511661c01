//! DBGp wire framing and command-line parsing
//!
//! Inbound commands are NUL-terminated ASCII lines:
//! ```text
//! <command> -i <transaction_id> [-<flag> <value>]... [-- <base64 data>]
//! ```
//! Outbound packets carry a decimal length prefix:
//! ```text
//! <length>\0<?xml version="1.0" encoding="UTF-8"?><body>\0
//! ```
//!
//! Values are not quoted or escaped. A value runs until the next `" -"`, so
//! a literal `" -"` inside a value cannot be expressed.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use url::Url;

use crate::common::{Error, Result};

use super::buffer::Buffer;

/// XML declaration that starts every outbound packet
pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Bytes requested from the socket per read while assembling a command
const READ_CHUNK: usize = 1024;

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    /// Command name, e.g. `breakpoint_set`
    pub name: String,
    /// Value of the mandatory `-i` flag
    pub transaction_id: String,
    args: Vec<(char, String)>,
    data: Option<String>,
}

impl CommandArgs {
    /// Value of `-<flag>`, if present
    pub fn get(&self, flag: char) -> Option<&str> {
        self.args
            .iter()
            .find(|(f, _)| *f == flag)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `-<flag>`, or INVALID_OPTIONS if missing
    pub fn require(&self, flag: char) -> Result<&str> {
        self.get(flag).ok_or_else(|| Error::missing_arg(flag))
    }

    /// Parse `-<flag>` as a number; a malformed value is INVALID_OPTIONS
    pub fn parse<T: FromStr>(&self, flag: char) -> Result<Option<T>> {
        match self.get(flag) {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| {
                Error::InvalidOptions(format!("invalid value '{}' for -{}", value, flag))
            }),
        }
    }

    /// Raw text after `--`, still base64-encoded
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// All flags other than `-i`, in arrival order
    pub fn args(&self) -> impl Iterator<Item = (char, &str)> {
        self.args.iter().map(|(f, v)| (*f, v.as_str()))
    }
}

/// A command line that could not be parsed
///
/// Keeps whatever name and transaction id were recovered so the error
/// response can still be correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub name: String,
    pub transaction_id: String,
    pub reason: String,
}

impl From<ParseFailure> for Error {
    fn from(e: ParseFailure) -> Self {
        Error::Parse(e.reason)
    }
}

/// Parse one command line (without its terminating NUL)
pub fn parse_command(line: &str) -> std::result::Result<CommandArgs, ParseFailure> {
    let line = line.trim_end_matches(['\0', '\r', '\n']);
    let (name, mut rest) = match line.find(' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, ""),
    };

    let mut transaction_id: Option<String> = None;
    let mut args = Vec::new();
    let mut data = None;

    let fail = |transaction_id: &Option<String>, reason: String| ParseFailure {
        name: name.to_string(),
        transaction_id: transaction_id.clone().unwrap_or_default(),
        reason,
    };

    if name.is_empty() {
        return Err(fail(&transaction_id, "empty command".to_string()));
    }

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }

        let mut chars = rest.chars();
        if chars.next() != Some('-') {
            return Err(fail(
                &transaction_id,
                format!("expected an argument flag at '{}'", rest),
            ));
        }
        let flag = match chars.next() {
            Some(flag) => flag,
            None => return Err(fail(&transaction_id, "dangling '-'".to_string())),
        };

        let after = &rest[1 + flag.len_utf8()..];
        if flag == '-' {
            data = Some(after.strip_prefix(' ').unwrap_or(after).to_string());
            break;
        }

        let value_part = match after.strip_prefix(' ') {
            Some(value_part) => value_part,
            None => {
                return Err(fail(
                    &transaction_id,
                    format!("argument -{} has no value", flag),
                ))
            }
        };
        let end = value_part.find(" -").unwrap_or(value_part.len());
        let value = &value_part[..end];
        rest = &value_part[end..];

        if flag == 'i' {
            transaction_id = Some(value.to_string());
        } else {
            args.push((flag, value.to_string()));
        }
    }

    match transaction_id {
        Some(transaction_id) => Ok(CommandArgs {
            name: name.to_string(),
            transaction_id,
            args,
            data,
        }),
        None => Err(fail(&None, "missing transaction id (-i)".to_string())),
    }
}

/// Frame an XML body as a complete outbound packet
pub fn encode_packet(body: &[u8]) -> Vec<u8> {
    let length = XML_DECLARATION.len() + body.len();
    let header = format!("{}\0", length);
    let mut packet = Vec::with_capacity(header.len() + length + 1);
    packet.extend_from_slice(header.as_bytes());
    packet.extend_from_slice(XML_DECLARATION.as_bytes());
    packet.extend_from_slice(body);
    packet.push(0);
    packet
}

/// Write a framed packet and flush
pub fn write_packet<W: Write + ?Sized>(writer: &mut W, body: &[u8]) -> Result<()> {
    writer.write_all(&encode_packet(body))?;
    writer.flush()?;
    Ok(())
}

/// Remove and return the first complete command already in `buf`
pub fn take_command(buf: &mut Buffer) -> Option<String> {
    let end = buf.find(0)?;
    let command = String::from_utf8_lossy(&buf.as_bytes()[..end]).into_owned();
    buf.delete_prefix(end + 1);
    Some(command)
}

/// Block until a complete command has been received
///
/// Bytes after the terminating NUL stay in `buf` for the next call.
pub fn read_command<R: Read + ?Sized>(reader: &mut R, buf: &mut Buffer) -> Result<String> {
    loop {
        if let Some(command) = take_command(buf) {
            return Ok(command);
        }
        if buf.read_from(reader, READ_CHUNK)? == 0 {
            return Err(Error::Disconnected);
        }
    }
}

/// Decode a base64 argument (the `--` data of a command)
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Parse(format!("invalid base64 data: {}", e)))
}

/// Convert a `file://` URI back into a local path
///
/// Plain paths are passed through. A drive-letter path such as
/// `file:///C:/x.ahk` loses its leading slash on hosts where the URL
/// library keeps it.
pub fn decode_file_uri(uri: &str) -> Result<PathBuf> {
    let is_file_uri = uri
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("file:"));
    if !is_file_uri {
        return Ok(PathBuf::from(uri));
    }

    let invalid = |reason: String| Error::InvalidUri {
        uri: uri.to_string(),
        reason,
    };
    let url = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    let path = url
        .to_file_path()
        .map_err(|()| invalid("not a local file path".to_string()))?;

    let text = path.to_string_lossy();
    let b = text.as_bytes();
    if b.len() >= 3 && b[0] == b'/' && b[1].is_ascii_alphabetic() && b[2] == b':' {
        return Ok(PathBuf::from(&text[1..]));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_breakpoint_set() {
        let cmd = parse_command("breakpoint_set -i 1 -t line -f file:///a.ahk -n 10").unwrap();
        assert_eq!(cmd.name, "breakpoint_set");
        assert_eq!(cmd.transaction_id, "1");
        assert_eq!(cmd.get('t'), Some("line"));
        assert_eq!(cmd.get('f'), Some("file:///a.ahk"));
        assert_eq!(cmd.parse::<u32>('n').unwrap(), Some(10));
        assert_eq!(cmd.data(), None);
    }

    #[test]
    fn test_parse_data_extends_to_end() {
        let cmd = parse_command("property_set -i 7 -n x -- aGVsbG8gLXdvcmxk").unwrap();
        assert_eq!(cmd.get('n'), Some("x"));
        assert_eq!(cmd.data(), Some("aGVsbG8gLXdvcmxk"));
    }

    #[test]
    fn test_values_may_contain_spaces() {
        let cmd = parse_command("source -i 2 -f file:///my script.ahk -b 1").unwrap();
        assert_eq!(cmd.get('f'), Some("file:///my script.ahk"));
        assert_eq!(cmd.get('b'), Some("1"));
    }

    #[test]
    fn test_space_dash_splits_value() {
        // Known limitation: " -" always starts the next flag.
        let cmd = parse_command("feature_set -i 3 -n name -v a -b c").unwrap();
        assert_eq!(cmd.get('v'), Some("a"));
        assert_eq!(cmd.get('b'), Some("c"));
    }

    #[test]
    fn test_flag_without_value_is_parse_error() {
        let err = parse_command("stack_get -i 4 -d").unwrap_err();
        assert_eq!(err.name, "stack_get");
        assert_eq!(err.transaction_id, "4");
        assert_eq!(Error::from(err).code(), crate::protocol::ErrorCode::ParseError);
    }

    #[test]
    fn test_missing_transaction_id_is_parse_error() {
        let err = parse_command("status").unwrap_err();
        assert_eq!(err.name, "status");
        assert_eq!(err.transaction_id, "");
    }

    #[test]
    fn test_garbage_between_flags_is_parse_error() {
        assert!(parse_command("run -i 1 oops").is_err());
    }

    #[test]
    fn test_encode_packet() {
        let packet = encode_packet(b"<response/>");
        let expected_len = XML_DECLARATION.len() + "<response/>".len();
        let expected = format!("{}\0{}<response/>\0", expected_len, XML_DECLARATION);
        assert_eq!(packet, expected.into_bytes());
    }

    #[test]
    fn test_read_command_splits_on_nul() {
        let mut input: &[u8] = b"status -i 1\0run -i 2\0";
        let mut buf = Buffer::new();
        assert_eq!(read_command(&mut input, &mut buf).unwrap(), "status -i 1");
        assert_eq!(read_command(&mut input, &mut buf).unwrap(), "run -i 2");
        assert!(matches!(
            read_command(&mut input, &mut buf),
            Err(Error::Disconnected)
        ));
    }

    #[test]
    fn test_decode_file_uri() {
        assert_eq!(
            decode_file_uri("file:///home/u/my%20script.ahk").unwrap(),
            PathBuf::from("/home/u/my script.ahk")
        );
        assert_eq!(
            decode_file_uri("FILE:///a.ahk").unwrap(),
            PathBuf::from("/a.ahk")
        );
        assert_eq!(decode_file_uri("a.ahk").unwrap(), PathBuf::from("a.ahk"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_decode_drive_letter_uri() {
        assert_eq!(
            decode_file_uri("file:///C:/Scripts/a%231.ahk").unwrap(),
            PathBuf::from("C:/Scripts/a#1.ahk")
        );
    }

    #[test]
    fn test_decode_remote_file_uri_fails() {
        assert!(matches!(
            decode_file_uri("file://server.example/a.ahk"),
            Err(Error::InvalidUri { .. })
        ));
        assert!(matches!(
            decode_file_uri("file://[bad/a.ahk"),
            Err(Error::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_base64("***").is_err());
    }
}
