/// One `signature <name> { ... }` block lifted out of a signature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
  pub name: String,
  pub body: String,
}

/// Splits a signature file into its blocks. Comment lines and text between blocks are
/// dropped; an unterminated trailing block is returned as-is so validation reports it.
pub fn split_signatures(text: &str) -> Vec<SignatureBlock> {
  let mut blocks = Vec::new();
  let mut current: Option<(String, String, i32)> = None;

  for line in text.lines() {
    let trimmed = line.trim_start();
    if current.is_none() {
      if trimmed.starts_with('#') {
        continue;
      }
      let Some(rest) = trimmed.strip_prefix("signature ") else {
        continue;
      };
      let name = rest
        .split(|c: char| c.is_whitespace() || c == '{')
        .find(|s| !s.is_empty())
        .unwrap_or("unnamed")
        .to_string();
      current = Some((name, String::new(), 0));
    }

    if let Some((name, body, depth)) = current.as_mut() {
      body.push_str(line);
      body.push('\n');
      *depth += brace_delta(line);
      if *depth <= 0 && body.contains('{') {
        blocks.push(SignatureBlock {
          name: std::mem::take(name),
          body: std::mem::take(body),
        });
        current = None;
      }
    }
  }

  if let Some((name, body, _)) = current {
    blocks.push(SignatureBlock { name, body });
  }
  blocks
}

fn brace_delta(line: &str) -> i32 {
  let mut delta = 0;
  let mut in_string = false;
  let mut escaped = false;
  for c in line.chars() {
    match c {
      _ if escaped => escaped = false,
      '\\' if in_string => escaped = true,
      '"' => in_string = !in_string,
      '{' if !in_string => delta += 1,
      '}' if !in_string => delta -= 1,
      _ => {}
    }
  }
  delta
}
