//! Injection of a mirror repository into Gradle build scripts
//!
//! Both transforms rewrite the whole file and are no-ops when the file already
//! references the mirror URL, so repeated builds of the same tree do not stack
//! duplicate entries.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Build tool major versions above this one refuse plain-HTTP repositories
/// unless told otherwise.
const INSECURE_FLAG_AFTER_MAJOR: u32 = 5;

/// Leading numeric component of a version string; 0 when unparseable.
pub fn major_version(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|major| major.trim().parse().ok())
        .unwrap_or(0)
}

/// Repository entry for `url`, with `allowInsecureProtocol` for newer tools.
pub fn repository_entry(url: &str, tool_version: &str) -> String {
    if major_version(tool_version) > INSECURE_FLAG_AFTER_MAJOR {
        format!("maven {{ url '{}'; allowInsecureProtocol true }}", url)
    } else {
        format!("maven {{ url '{}' }}", url)
    }
}

fn references(content: &str, url: &str) -> bool {
    content.contains(&format!("url '{}'", url))
}

fn join_like(original: &str, lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Inserts the mirror entry after every `mavenCentral()` call. A call that
/// shares its line with the end of the block (`repositories { mavenCentral() }`)
/// is split so the entry lands inside the block. Returns `None` when nothing
/// changes.
pub fn inject_into_build_script(content: &str, url: &str, tool_version: &str) -> Option<String> {
    const CALL: &str = "mavencentral()";
    if references(content, url) {
        return None;
    }
    let entry = repository_entry(url, tool_version);
    let mut changed = false;
    let mut lines = Vec::new();
    for line in content.lines() {
        let Some(pos) = line.to_ascii_lowercase().find(CALL) else {
            lines.push(line.to_string());
            continue;
        };
        changed = true;
        let indent = indent_of(line);
        let (call, rest) = line.split_at(pos + CALL.len());
        if rest.trim().is_empty() {
            lines.push(line.to_string());
            lines.push(format!("{}{}", indent, entry));
        } else {
            lines.push(call.to_string());
            lines.push(format!("{}    {}", indent, entry));
            lines.push(format!("{}{}", indent, rest.trim()));
        }
    }
    changed.then(|| join_like(content, lines))
}

/// Adds the mirror to the first `repositories` block, or prepends a
/// `pluginManagement` block when there is none. Returns `None` when nothing
/// changes.
pub fn inject_into_settings(content: &str, url: &str, tool_version: &str) -> Option<String> {
    const BLOCK: &str = "repositories";
    if references(content, url) {
        return None;
    }
    let entry = repository_entry(url, tool_version);
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let block_start = lines.iter().enumerate().find_map(|(i, l)| {
        l.to_ascii_lowercase()
            .find(BLOCK)
            .map(|pos| (i, pos + BLOCK.len()))
    });
    let brace = block_start.and_then(|(start, offset)| {
        (start..lines.len()).find_map(|i| {
            let from = if i == start { offset } else { 0 };
            lines[i][from..].find('{').map(|pos| (i, from + pos))
        })
    });

    match brace {
        Some((i, pos)) => {
            let line = std::mem::take(&mut lines[i]);
            let (open, rest) = line.split_at(pos + 1);
            let inner = format!("{}    ", indent_of(&line));
            let mut replacement = vec![open.to_string(), format!("{}{}", inner, entry)];
            if !rest.trim().is_empty() {
                replacement.push(format!("{}{}", inner, rest.trim()));
            }
            lines.splice(i..=i, replacement);
            Some(join_like(content, lines))
        }
        None => {
            let block = format!(
                "pluginManagement {{\n    repositories {{\n        {}\n    }}\n}}",
                entry
            );
            lines.insert(0, block);
            Some(join_like(content, lines))
        }
    }
}

/// Applies [`inject_into_build_script`] to a file. Returns whether it changed.
pub fn inject_build_file(path: &Path, url: &str, tool_version: &str) -> io::Result<bool> {
    let content = fs::read_to_string(path)?;
    match inject_into_build_script(&content, url, tool_version) {
        Some(updated) => {
            fs::write(path, updated)?;
            debug!(file = %path.display(), "Added mirror repository");
            Ok(true)
        }
        None => {
            trace!(file = %path.display(), "Build script unchanged");
            Ok(false)
        }
    }
}

/// Applies [`inject_into_settings`] to a file. A missing settings file is
/// skipped with a warning.
pub fn inject_settings_file(path: &Path, url: &str, tool_version: &str) -> io::Result<bool> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(file = %path.display(), "No settings file, mirror not added to plugin resolution");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    match inject_into_settings(&content, url, tool_version) {
        Some(updated) => {
            fs::write(path, updated)?;
            debug!(file = %path.display(), "Added mirror repository to settings");
            Ok(true)
        }
        None => Ok(false),
    }
}
