//! Query-string, url-encoded form and multipart parsing

use crate::error::{Error, Result, codes};
use crate::latin1;
use bytes::Bytes;
use memchr::memmem;

/// Parse a query string or url-encoded body into decoded pairs.
///
/// Keys are returned as sent; values are byte-strings (see [`latin1`]).
pub fn parse_pairs(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (latin1::percent_decode(key), latin1::percent_decode(value))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Uploaded file carried alongside the parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Field name
    pub name: String,

    /// Original filename
    pub filename: String,

    /// Content type (MIME type), if the part declared one
    pub content_type: Option<String>,

    /// Raw payload
    pub data: Bytes,
}

impl Attachment {
    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Payload as a byte-string
    pub fn as_latin1(&self) -> String {
        latin1::decode(&self.data)
    }

    /// Get file extension
    pub fn extension(&self) -> Option<&str> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// One decoded multipart section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Part {
    pub fn into_attachment(self) -> Option<Attachment> {
        let filename = self.filename?;
        Some(Attachment {
            name: self.name,
            filename,
            content_type: self.content_type,
            data: self.data,
        })
    }
}

/// Multipart form data parser
#[derive(Debug, Clone)]
pub struct MultipartParser {
    boundary: String,
}

impl MultipartParser {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    /// Create a parser from a `Content-Type` header value
    pub fn from_content_type(content_type: &str) -> Result<Self> {
        // "multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxkTrZu0gW"
        let boundary = content_type
            .split(';')
            .find_map(|part| {
                let (key, value) = part.trim().split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("boundary")
                    .then(|| value.trim().trim_matches('"').to_string())
            })
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                Error::new(codes::MALFORMED_BODY, "missing boundary in Content-Type")
                    .with_data("content_type", content_type)
            })?;

        Ok(Self { boundary })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Split a body on the boundary and decode every part
    pub fn parse(&self, body: &[u8]) -> Result<Vec<Part>> {
        let delimiter = format!("--{}", self.boundary);
        let finder = memmem::Finder::new(delimiter.as_bytes());
        let starts: Vec<usize> = finder.find_iter(body).collect();

        let mut parts = Vec::new();
        for window in starts.windows(2) {
            let section = &body[window[0] + delimiter.len()..window[1]];
            if section.starts_with(b"--") {
                break;
            }
            parts.push(Self::parse_part(section)?);
        }
        Ok(parts)
    }

    fn parse_part(section: &[u8]) -> Result<Part> {
        let section = strip_prefix_newline(section);
        let section = strip_suffix_newline(section);

        let (head, data) = match memmem::find(section, b"\r\n\r\n") {
            Some(at) => (&section[..at], &section[at + 4..]),
            None => match memmem::find(section, b"\n\n") {
                Some(at) => (&section[..at], &section[at + 2..]),
                None => (section, &[][..]),
            },
        };

        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        for line in latin1::decode(head).lines() {
            let Some((header, value)) = line.split_once(':') else {
                continue;
            };
            let header = header.trim();
            if header.eq_ignore_ascii_case("content-disposition") {
                for attr in value.split(';').map(str::trim) {
                    if let Some(v) = attr.strip_prefix("name=") {
                        name = Some(v.trim_matches('"').to_string());
                    } else if let Some(v) = attr.strip_prefix("filename=") {
                        filename = Some(v.trim_matches('"').to_string());
                    }
                }
            } else if header.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }

        let name = name.ok_or_else(|| {
            Error::new(codes::MALFORMED_BODY, "multipart section without a field name")
        })?;

        Ok(Part {
            name,
            filename,
            content_type,
            data: Bytes::copy_from_slice(data),
        })
    }
}

fn strip_prefix_newline(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_prefix(b"\r\n")
        .or_else(|| bytes.strip_prefix(b"\n"))
        .unwrap_or(bytes)
}

fn strip_suffix_newline(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----ArborBoundary7MA4";

    fn multipart_body(binary: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
        body.extend_from_slice(b"Quarterly report\r\n");
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"report.bin\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(binary);
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs("name=John+Doe&email=john%40example.com&flag");
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "John Doe".to_string()),
                ("email".to_string(), "john@example.com".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_pairs_skips_empty_segments() {
        assert!(parse_pairs("").is_empty());
        assert_eq!(parse_pairs("&&a=1&").len(), 1);
    }

    #[test]
    fn test_boundary_from_content_type() {
        let parser = MultipartParser::from_content_type(
            "multipart/form-data; boundary=\"----WebKitFormBoundary7MA4YWxkTrZu0gW\"",
        )
        .unwrap();
        assert_eq!(parser.boundary(), "----WebKitFormBoundary7MA4YWxkTrZu0gW");
    }

    #[test]
    fn test_missing_boundary() {
        let err = MultipartParser::from_content_type("multipart/form-data").unwrap_err();
        assert_eq!(err.code(), codes::MALFORMED_BODY);
    }

    #[test]
    fn test_parse_text_and_file_parts() {
        let binary = [0x00, 0xff, b'\r', b'\n', 0x80, 0x7f];
        let parser = MultipartParser::new(BOUNDARY);
        let parts = parser.parse(&multipart_body(&binary)).unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "title");
        assert_eq!(parts[0].filename, None);
        assert_eq!(&parts[0].data[..], b"Quarterly report");

        let file = parts[1].clone().into_attachment().unwrap();
        assert_eq!(file.filename, "report.bin");
        assert_eq!(file.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(&file.data[..], &binary);
        assert_eq!(file.extension(), Some("bin"));
        assert_eq!(file.as_latin1().chars().count(), binary.len());
    }

    #[test]
    fn test_part_without_name_is_rejected() {
        let body = format!(
            "--{b}\r\nContent-Type: text/plain\r\n\r\nhello\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let parser = MultipartParser::new(BOUNDARY);
        assert!(parser.parse(body.as_bytes()).is_err());
    }
}
