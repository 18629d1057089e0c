//! Minimal `multipart/form-data` parsing for single-file uploads.

use anyhow::{anyhow, Result};

/// One file field of a form.
#[derive(Debug)]
pub(super) struct FilePart<'a> {
    pub filename: Option<String>,
    pub data: &'a [u8],
}

/// `multipart/form-data; boundary=XYZ` -> `XYZ`.
pub(super) fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let mime = parts.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Find the part named `field` and return its body.
pub(super) fn extract_file_field<'a>(body: &'a [u8], boundary: &str, field: &str) -> Result<FilePart<'a>> {
    if boundary.is_empty() {
        return Err(anyhow!("multipart boundary is empty"));
    }
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut rest = body;
    let mut start = find(rest, &delimiter).ok_or_else(|| anyhow!("multipart body has no boundary"))?;

    loop {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        let rest_after_crlf = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        let header_end = find(rest_after_crlf, b"\r\n\r\n")
            .ok_or_else(|| anyhow!("multipart part has no header terminator"))?;
        let headers = String::from_utf8_lossy(&rest_after_crlf[..header_end]);
        let content = &rest_after_crlf[header_end + 4..];

        let mut closing = b"\r\n".to_vec();
        closing.extend_from_slice(&delimiter);
        let end = find(content, &closing).ok_or_else(|| anyhow!("multipart part is not terminated"))?;

        if let Some((name, filename)) = content_disposition(&headers) {
            if name == field {
                return Ok(FilePart {
                    filename,
                    data: &content[..end],
                });
            }
        }
        // Continue from the next delimiter.
        rest = &content[end + 2..];
        start = 0;
    }
    Err(anyhow!("form field '{}' not found", field))
}

/// `(name, filename)` from a part's `Content-Disposition` header.
fn content_disposition(headers: &str) -> Option<(String, Option<String>)> {
    let line = headers
        .split("\r\n")
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"))?;
    let mut name = None;
    let mut filename = None;
    for param in line.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "name" => name = Some(value),
            "filename" => filename = Some(value),
            _ => {}
        }
    }
    Some((name?, filename))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"note\"\r\n\r\n\
hello\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n\
Content-Type: video/mp4\r\n\r\n\
\x00\x01binary\r\ndata\r\n\
--XyZ--\r\n";

    #[test]
    fn boundary_is_read_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"XyZ\""),
            Some("XyZ".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
    }

    #[test]
    fn file_field_is_extracted_with_embedded_crlf() -> Result<()> {
        let part = extract_file_field(BODY, "XyZ", "file")?;
        assert_eq!(part.filename.as_deref(), Some("clip.mp4"));
        assert_eq!(part.data, b"\x00\x01binary\r\ndata");
        Ok(())
    }

    #[test]
    fn missing_field_is_an_error() {
        assert!(extract_file_field(BODY, "XyZ", "video").is_err());
        assert!(extract_file_field(b"no boundary here", "XyZ", "file").is_err());
    }
}
