//! `multipart/related` 打包与拆包。
//!
//! # 设计背景（Why）
//! - MTOM、SwA 与带附件的二进制编码共享同一种 MIME 封装，差别只在根部件的内容类型；
//! - 解码端必须先拿到根部件的内容类型才能决定交给哪个委托，因此拆包与委托解码分离：
//!   先解析为 [`MimePackage`]，再由绑定编解码器分类。
//!
//! # 契约说明（What）
//! - 写出：每个部件带 `Content-Type`、`Content-Transfer-Encoding: binary` 与 `Content-ID: <cid>`，行尾为 CRLF；
//! - 读取：根部件由 `start` 参数指定，缺省为第一个部件；
//!   按 content-id 查找部件时先精确匹配，失败后对请求的 id 做百分号解码再匹配一次。
//!
//! # 风险提示（Trade-offs）
//! - 部件正文以 [`Bytes`] 切片共享原始缓冲，不做复制；调用方需保证原始缓冲在解码期间有效。

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::percent_decode_str;

use crate::error::CodecError;
use crate::media_type::MediaType;

/// 单个 MIME 部件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimePart {
    /// 不带尖括号的 content-id；缺失时为空串。
    pub content_id: String,
    pub content_type: String,
    pub body: Bytes,
}

/// 已拆包的 multipart 消息。
#[derive(Clone, Debug)]
pub struct MimePackage {
    pub root: MimePart,
    pub attachments: Vec<MimePart>,
}

impl MimePackage {
    /// 按 content-id 取出部件（从附件列表中移除），容忍百分号编码的 id。
    pub fn take_part(&mut self, content_id: &str) -> Option<MimePart> {
        if let Some(index) = self.position(content_id) {
            return Some(self.attachments.remove(index));
        }
        let decoded = percent_decode_str(content_id).decode_utf8().ok()?;
        if matches!(decoded, Cow::Borrowed(_)) {
            return None;
        }
        let index = self.position(&decoded)?;
        Some(self.attachments.remove(index))
    }

    fn position(&self, content_id: &str) -> Option<usize> {
        self.attachments
            .iter()
            .position(|part| part.content_id == content_id)
    }
}

/// 生成新的分隔符。
pub fn new_boundary() -> String {
    format!("uuid:{}", uuid::Uuid::new_v4())
}

/// 生成新的 content-id（不带尖括号）。
pub fn new_content_id() -> String {
    format!("{}@spark.soap", uuid::Uuid::new_v4())
}

/// 写出 multipart 正文；根部件总在首位。
pub fn write_multipart(boundary: &str, root: &MimePart, attachments: &[MimePart]) -> Bytes {
    let estimate = root.body.len()
        + attachments.iter().map(|part| part.body.len() + 128).sum::<usize>()
        + 256;
    let mut out = BytesMut::with_capacity(estimate);
    for part in std::iter::once(root).chain(attachments) {
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(format!("Content-Type: {}\r\n", part.content_type).as_bytes());
        out.put_slice(b"Content-Transfer-Encoding: binary\r\n");
        out.put_slice(format!("Content-ID: <{}>\r\n\r\n", part.content_id).as_bytes());
        out.put_slice(&part.body);
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(b"--\r\n");
    out.freeze()
}

/// 按 `multipart/related` 内容类型拆包。
pub fn parse_multipart(body: &[u8], media: &MediaType) -> Result<MimePackage, CodecError> {
    let boundary = media
        .param("boundary")
        .filter(|boundary| !boundary.is_empty())
        .ok_or_else(|| CodecError::MalformedMime("missing boundary parameter".to_owned()))?;
    let start = media.param("start").map(strip_angle_brackets);

    let source = Bytes::copy_from_slice(body);
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut cursor = find(&source, delimiter, 0)
        .ok_or_else(|| CodecError::MalformedMime("no opening boundary".to_owned()))?;
    let mut parts = Vec::new();
    loop {
        cursor += delimiter.len();
        if source[cursor..].starts_with(b"--") {
            break;
        }
        cursor = skip_line_break(&source, cursor);
        let next = find(&source, delimiter, cursor)
            .ok_or_else(|| CodecError::MalformedMime("missing closing boundary".to_owned()))?;
        let mut end = next;
        // 分隔符前的 CRLF 属于分隔符。
        if end >= cursor + 2 && &source[end - 2..end] == b"\r\n" {
            end -= 2;
        } else if end > cursor && source[end - 1] == b'\n' {
            end -= 1;
        }
        parts.push(parse_part(source.slice(cursor..end))?);
        cursor = next;
    }

    if parts.is_empty() {
        return Err(CodecError::MalformedMime("package has no parts".to_owned()));
    }
    let root_index = match start {
        Some(start) => parts
            .iter()
            .position(|part| part.content_id == start)
            .ok_or_else(|| CodecError::MissingAttachment(start.to_owned()))?,
        None => 0,
    };
    let root = parts.remove(root_index);
    Ok(MimePackage {
        root,
        attachments: parts,
    })
}

fn parse_part(raw: Bytes) -> Result<MimePart, CodecError> {
    let (header_end, body_start) = match find(&raw, b"\r\n\r\n", 0) {
        Some(index) => (index, index + 4),
        None => match find(&raw, b"\n\n", 0) {
            Some(index) => (index, index + 2),
            None => {
                return Err(CodecError::MalformedMime(
                    "part has no header terminator".to_owned(),
                ));
            }
        },
    };
    let headers = std::str::from_utf8(&raw[..header_end])
        .map_err(|err| CodecError::MalformedMime(err.to_string()))?;

    let mut content_id = String::new();
    let mut content_type = String::from("application/octet-stream");
    for line in headers.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-id") {
            content_id = strip_angle_brackets(value).to_owned();
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            content_type = value.to_owned();
        }
    }
    Ok(MimePart {
        content_id,
        content_type,
        body: raw.slice(body_start..),
    })
}

fn strip_angle_brackets(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(value)
}

fn skip_line_break(source: &[u8], mut cursor: usize) -> usize {
    // 分隔符行可能带有尾随空白。
    while cursor < source.len() && matches!(source[cursor], b' ' | b'\t') {
        cursor += 1;
    }
    if source[cursor..].starts_with(b"\r\n") {
        cursor + 2
    } else if source[cursor..].starts_with(b"\n") {
        cursor + 1
    } else {
        cursor
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|index| index + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: &str, ty: &str, body: &'static [u8]) -> MimePart {
        MimePart {
            content_id: id.to_owned(),
            content_type: ty.to_owned(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn writes_and_parses_parts_with_start_parameter() {
        let boundary = "uuid:test";
        let root = part("root@x", "text/xml", b"<a/>");
        let attachments = [part("img@x", "image/png", b"\x89PNG\r\n--not-a-boundary")];
        let body = write_multipart(boundary, &root, &attachments);
        let media = MediaType::new("multipart/related")
            .with_param("boundary", boundary)
            .with_param("start", "<root@x>");
        let package = parse_multipart(&body, &media).expect("拆包");
        assert_eq!(package.root, root);
        assert_eq!(package.attachments, attachments.to_vec());
    }

    #[test]
    fn percent_encoded_ids_are_retried_decoded() {
        let mut package = MimePackage {
            root: part("root", "text/xml", b""),
            attachments: vec![part("a b@x", "text/plain", b"data")],
        };
        let found = package.take_part("a%20b@x").expect("解码后匹配");
        assert_eq!(found.body, Bytes::from_static(b"data"));
        assert!(package.take_part("missing%20id").is_none());
    }

    #[test]
    fn missing_boundary_is_malformed() {
        let media = MediaType::new("multipart/related");
        assert!(matches!(
            parse_multipart(b"--x\r\n\r\n--x--", &media),
            Err(CodecError::MalformedMime(_))
        ));
    }
}
