//! Mime types and payload encoding for clipboard and drag-and-drop

/// Common MIME types for clipboard
pub mod mime_types {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const TEXT_PLAIN_UTF8: &str = "text/plain;charset=utf-8";
    pub const TEXT_URI_LIST: &str = "text/uri-list";
}

use mime_types::*;

/// Toolkit-level data format
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Text,
    FileNames,
    /// Any other mime type, reported verbatim
    Raw(String),
}

impl DataFormat {
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            TEXT_PLAIN | TEXT_PLAIN_UTF8 => DataFormat::Text,
            TEXT_URI_LIST => DataFormat::FileNames,
            other => DataFormat::Raw(other.to_string()),
        }
    }
}

/// Formats offered by a list of mime types, deduplicated in offer order
pub fn formats_of(mime_types: &[String]) -> Vec<DataFormat> {
    let mut formats = Vec::new();
    for mime in mime_types {
        let format = DataFormat::from_mime(mime);
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    formats
}

/// Outbound transfer content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Uris(Vec<String>),
    /// Opaque bytes under the caller's own format name
    Raw { mime_type: String, bytes: Vec<u8> },
}

impl Payload {
    /// Every mime type this payload is advertised under
    pub fn mime_types(&self) -> Vec<String> {
        match self {
            Payload::Text(_) => vec![TEXT_PLAIN.to_string(), TEXT_PLAIN_UTF8.to_string()],
            Payload::Uris(_) => vec![TEXT_URI_LIST.to_string()],
            Payload::Raw { mime_type, .. } => vec![mime_type.clone()],
        }
    }

    /// Bytes to send for `mime`; `None` means the pipe is closed empty
    pub fn encode(&self, mime: &str) -> Option<Vec<u8>> {
        match self {
            Payload::Text(text) if mime == TEXT_PLAIN || mime == TEXT_PLAIN_UTF8 => {
                Some(text.as_bytes().to_vec())
            }
            Payload::Uris(uris) if mime == TEXT_URI_LIST => Some(encode_uri_list(uris)),
            Payload::Raw { mime_type, bytes } if mime == mime_type => Some(bytes.clone()),
            _ => None,
        }
    }
}

pub fn encode_uri_list(uris: &[String]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for uri in uris {
        bytes.extend_from_slice(uri.as_bytes());
        bytes.push(b'\n');
    }
    bytes
}

/// Splits a received uri list into entries, tolerating CRLF line ends
pub fn decode_uri_list(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Mime type to request for text, preferring plain over the utf-8 variant
pub fn text_mime(mime_types: &[String]) -> Option<&'static str> {
    [TEXT_PLAIN, TEXT_PLAIN_UTF8]
        .into_iter()
        .find(|candidate| mime_types.iter().any(|mime| mime == candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_text_payload_answers_both_text_types() {
        let payload = Payload::Text("hello".into());
        assert_eq!(payload.mime_types(), vec![TEXT_PLAIN, TEXT_PLAIN_UTF8]);
        assert_eq!(payload.encode(TEXT_PLAIN).as_deref(), Some(&b"hello"[..]));
        assert_eq!(payload.encode(TEXT_PLAIN_UTF8).as_deref(), Some(&b"hello"[..]));
        assert_eq!(payload.encode("image/png"), None);
    }

    #[test]
    fn test_uri_list_encoding() {
        let payload = Payload::Uris(vec!["/a".into(), "/b".into()]);
        assert_eq!(payload.encode(TEXT_URI_LIST).unwrap(), b"/a\n/b\n".to_vec());
        assert_eq!(decode_uri_list(b"/a\n/b\n"), vec!["/a", "/b"]);
        assert_eq!(decode_uri_list(b"file:///x\r\nfile:///y"), vec!["file:///x", "file:///y"]);
    }

    #[test]
    fn test_formats_deduplicated() {
        let mimes: Vec<String> = [TEXT_PLAIN_UTF8, TEXT_PLAIN, TEXT_URI_LIST, "image/png"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            formats_of(&mimes),
            vec![
                DataFormat::Text,
                DataFormat::FileNames,
                DataFormat::Raw("image/png".into())
            ]
        );
        assert_eq!(text_mime(&mimes), Some(TEXT_PLAIN));
    }

    proptest! {
        #[test]
        fn prop_uri_lists_survive_encoding(uris in proptest::collection::vec("[a-zA-Z0-9/._~-]{1,40}", 0..16)) {
            let encoded = encode_uri_list(&uris);
            prop_assert_eq!(decode_uri_list(&encoded), uris);
        }
    }
}
