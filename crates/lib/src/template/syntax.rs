//! Template markup.
//!
//! Two constructs are recognised in a source file:
//!
//! - `<% ... %>` runs the enclosed Lua code and produces no output
//! - `${ ... }` evaluates a Lua expression and inserts its `tostring` value
//!
//! Everything else is copied through unchanged. The generated Lua chunk keeps
//! every construct on the line it came from, so errors raised by template code
//! point at the right line of the source file.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Segment<'a> {
  Text(&'a [u8]),
  Code(&'a [u8]),
  Expr(&'a [u8]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SyntaxError {
  pub line: usize,
  pub message: String,
}

const CODE_OPEN: &[u8] = b"<%";
const CODE_CLOSE: &[u8] = b"%>";
const EXPR_OPEN: &[u8] = b"${";

/// Split `source` into text, code and expression segments.
pub(super) fn parse(source: &[u8]) -> Result<Vec<Segment<'_>>, SyntaxError> {
  let mut segments = Vec::new();
  let mut text_start = 0;
  let mut pos = 0;

  while pos < source.len() {
    let rest = &source[pos..];
    if rest.starts_with(CODE_OPEN) {
      push_text(&mut segments, &source[text_start..pos]);
      let body_start = pos + CODE_OPEN.len();
      let body_len = find(&source[body_start..], CODE_CLOSE).ok_or_else(|| SyntaxError {
        line: line_of(source, pos),
        message: "unterminated '<%' block".to_string(),
      })?;
      segments.push(Segment::Code(&source[body_start..body_start + body_len]));
      pos = body_start + body_len + CODE_CLOSE.len();
      text_start = pos;
    } else if rest.starts_with(EXPR_OPEN) {
      push_text(&mut segments, &source[text_start..pos]);
      let body_start = pos + EXPR_OPEN.len();
      let body_len = matching_brace(&source[body_start..]).ok_or_else(|| SyntaxError {
        line: line_of(source, pos),
        message: "unterminated '${' expression".to_string(),
      })?;
      let body = &source[body_start..body_start + body_len];
      if body.iter().all(u8::is_ascii_whitespace) {
        return Err(SyntaxError {
          line: line_of(source, pos),
          message: "empty '${}' expression".to_string(),
        });
      }
      segments.push(Segment::Expr(body));
      pos = body_start + body_len + 1;
      text_start = pos;
    } else {
      pos += 1;
    }
  }
  push_text(&mut segments, &source[text_start..]);

  Ok(segments)
}

/// Lua chunk that replays `segments` through `__emit`.
pub(super) fn to_chunk(segments: &[Segment<'_>]) -> Vec<u8> {
  let mut chunk = Vec::new();
  for segment in segments {
    match segment {
      Segment::Text(text) => {
        chunk.extend_from_slice(b"__emit(\"");
        escape_into(&mut chunk, text);
        chunk.extend_from_slice(b"\");");
        let newlines = text.iter().filter(|&&b| b == b'\n').count();
        chunk.extend(std::iter::repeat_n(b'\n', newlines));
      }
      Segment::Code(body) => {
        chunk.extend_from_slice(body);
        // A trailing line comment would swallow the next statement.
        let last_line = body.rsplit(|&b| b == b'\n').next().unwrap_or(body);
        if find(last_line, b"--").is_some() {
          chunk.push(b'\n');
        }
        chunk.push(b' ');
      }
      Segment::Expr(body) => {
        chunk.extend_from_slice(b"__emit(tostring(");
        chunk.extend_from_slice(body);
        chunk.extend_from_slice(b"));");
      }
    }
  }
  chunk
}

fn push_text<'a>(segments: &mut Vec<Segment<'a>>, text: &'a [u8]) {
  if !text.is_empty() {
    segments.push(Segment::Text(text));
  }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack.windows(needle.len()).position(|window| window == needle)
}

/// Offset of the `}` closing an expression, counting nested braces.
fn matching_brace(body: &[u8]) -> Option<usize> {
  let mut depth = 0usize;
  for (i, &b) in body.iter().enumerate() {
    match b {
      b'{' => depth += 1,
      b'}' if depth == 0 => return Some(i),
      b'}' => depth -= 1,
      _ => {}
    }
  }
  None
}

fn line_of(source: &[u8], offset: usize) -> usize {
  source[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

fn escape_into(out: &mut Vec<u8>, text: &[u8]) {
  for &b in text {
    match b {
      b'\\' => out.extend_from_slice(b"\\\\"),
      b'"' => out.extend_from_slice(b"\\\""),
      b'\n' => out.extend_from_slice(b"\\n"),
      b'\r' => out.extend_from_slice(b"\\r"),
      b'\t' => out.extend_from_slice(b"\\t"),
      b if b.is_ascii_control() => out.extend_from_slice(format!("\\x{:02x}", b).as_bytes()),
      b => out.push(b),
    }
  }
}
