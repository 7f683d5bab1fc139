//! JavaScript, CSS and image compression
//!
//! When a command is configured for a file type the file is piped through
//! it (stdin to stdout). Otherwise a built-in transform is used: JavaScript
//! loses comments and redundant whitespace without renaming anything, CSS
//! goes through grass' compressed output and PNG images are re-encoded
//! losslessly.

use anyhow::{Context, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::ImageFormat;
use std::io::Write;
use std::process::{Command, Stdio};

use super::scan::{segments, Region};
use super::FileRecord;

/// Characters that never need surrounding whitespace in JavaScript
const JS_TIGHT: &[char] = &['{', '}', '(', ')', '[', ']', ';', ',', ':', '=', '<', '>', '!', '&', '|', '?', '*'];

pub fn minify_js(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut pending: Option<char> = None;

    for seg in segments(source) {
        match seg.region {
            Region::BlockComment if seg.text.starts_with("/*!") => {
                flush_separator(&mut out, &mut pending, seg.text.chars().next());
                out.push_str(seg.text);
            }
            Region::BlockComment => note_whitespace(&mut pending, seg.text.contains('\n')),
            Region::LineComment => {}
            Region::String | Region::Template | Region::Regex => {
                flush_separator(&mut out, &mut pending, seg.text.chars().next());
                out.push_str(seg.text);
            }
            Region::Code => {
                for ch in seg.text.chars() {
                    if ch.is_whitespace() {
                        note_whitespace(&mut pending, ch == '\n');
                    } else {
                        flush_separator(&mut out, &mut pending, Some(ch));
                        out.push(ch);
                    }
                }
            }
        }
    }

    out
}

/// Remember a whitespace run; a newline wins over a space so that
/// automatic semicolon insertion keeps working.
fn note_whitespace(pending: &mut Option<char>, newline: bool) {
    *pending = match (*pending, newline) {
        (_, true) | (Some('\n'), _) => Some('\n'),
        _ => Some(' '),
    };
}

fn flush_separator(out: &mut String, pending: &mut Option<char>, next: Option<char>) {
    let Some(separator) = pending.take() else {
        return;
    };
    let Some(last) = out.chars().last() else {
        return;
    };
    if separator == '\n' {
        out.push('\n');
        return;
    }
    let next_tight = next.map(|c| JS_TIGHT.contains(&c)).unwrap_or(true);
    if !JS_TIGHT.contains(&last) && !next_tight {
        out.push(' ');
    }
}

pub fn minify_css(source: &str) -> Result<String> {
    let options = grass::Options::default().style(grass::OutputStyle::Compressed);
    let mut css = grass::from_string(source, &options).map_err(|e| anyhow::anyhow!("{}", e))?;
    css.truncate(css.trim_end().len());
    Ok(css)
}

/// Pipe `input` through an external command and return its stdout.
pub fn run_tool(command: &[String], input: &[u8]) -> Result<Vec<u8>> {
    let (program, args) = command.split_first().context("Empty tool command")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;

    let mut stdin = child.stdin.take().context("Tool stdin unavailable")?;
    let (output, written) = std::thread::scope(|scope| {
        let writer = scope.spawn(move || stdin.write_all(input));
        let output = child.wait_with_output();
        let written = writer.join().unwrap_or_else(|_| Ok(()));
        (output, written)
    });
    let output = output.with_context(|| format!("Failed to run '{}'", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("'{}' exited with {}: {}", program, output.status, stderr.trim());
    }
    written.with_context(|| format!("Failed to write input to '{}'", program))?;

    Ok(output.stdout)
}

/// Record transform running `tool` when set, or `builtin` on the file text.
pub fn text_transform(
    tool: Option<Vec<String>>,
    builtin: fn(&str) -> Result<String>,
) -> impl Fn(FileRecord) -> Result<FileRecord> + Send + Sync + 'static {
    move |mut file| {
        let transformed = match tool {
            Some(ref command) => {
                let input = file.contents.as_deref().unwrap_or_default();
                run_tool(command, input).with_context(|| format!("Failed to process {}", file.path.display()))?
            }
            None => builtin(file.text()?)
                .with_context(|| format!("Failed to process {}", file.path.display()))?
                .into_bytes(),
        };
        file.contents = Some(transformed);
        Ok(file)
    }
}

/// Compress an image with `tool`, or re-encode PNGs at best compression.
///
/// The original bytes are kept when the result is not smaller.
pub fn compress_image(tool: Option<&[String]>, mut file: FileRecord) -> Result<FileRecord> {
    let input = match file.contents.take() {
        Some(bytes) => bytes,
        None => std::fs::read(&file.path).with_context(|| format!("Failed to read {}", file.path.display()))?,
    };

    let compressed = match tool {
        Some(command) => Some(
            run_tool(command, &input).with_context(|| format!("Failed to compress {}", file.path.display()))?,
        ),
        None => reencode_png(&input).unwrap_or_else(|e| {
            tracing::warn!(file = %file.path.display(), error = %e, "could not re-encode image");
            None
        }),
    };

    file.contents = match compressed {
        Some(bytes) if bytes.len() < input.len() => Some(bytes),
        _ => Some(input),
    };
    Ok(file)
}

/// Lossless PNG re-encode; `None` for other formats.
fn reencode_png(input: &[u8]) -> Result<Option<Vec<u8>>> {
    if !matches!(image::guess_format(input), Ok(ImageFormat::Png)) {
        return Ok(None);
    }

    let img = image::load_from_memory_with_format(input, ImageFormat::Png)?;
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
    img.write_with_encoder(encoder)?;
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_js_strips_comments_and_indentation() {
        let src = "/* header */\n(function () {\n    'use strict';\n    // the factory\n    var a = 1 + 2;\n\n    return a;\n})();\n";
        assert_eq!(minify_js(src), "(function(){\n'use strict';\nvar a = 1 + 2;\nreturn a;\n})();");
    }

    #[test]
    fn test_minify_js_keeps_literals() {
        let src = "var s = 'a   b // c';  var r = /x  y/g;";
        assert_eq!(minify_js(src), "var s='a   b // c';var r=/x  y/g;");
    }

    #[test]
    fn test_minify_js_keeps_license_comment() {
        assert_eq!(minify_js("/*! v1 */\nvar a;"), "/*! v1 */\nvar a;");
    }

    #[test]
    fn test_minify_css() {
        let src = "/* theme */\nbody {\n  margin : 0;\n  font-family: \"Open  Sans\", sans-serif;\n}\n\na > b { color: red; }\n";
        assert_eq!(
            minify_css(src).unwrap(),
            "body{margin:0;font-family:\"Open  Sans\",sans-serif}a>b{color:red}"
        );
    }

    #[test]
    fn test_minify_css_keeps_descendant_pseudo_selectors() {
        let src = ".nav :first-child { color: red; }\ndiv :not(.x) { margin: 0; }\n";
        assert_eq!(minify_css(src).unwrap(), ".nav :first-child{color:red}div :not(.x){margin:0}");
    }

    #[test]
    fn test_minify_css_rejects_broken_stylesheet() {
        assert!(minify_css("body { color: red;").is_err());
    }

    #[test]
    fn test_unknown_image_format_is_unchanged() {
        let file = FileRecord::new("logo.png", "", Some(vec![1, 2, 3]));
        let out = compress_image(None, file.clone()).unwrap();
        assert_eq!(out, file);
    }

    #[test]
    fn test_png_is_reencoded_losslessly() {
        let pixels = image::RgbImage::from_fn(64, 64, |x, _| image::Rgb([(x * 4) as u8, 10, 200]));
        let mut input = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut input, CompressionType::Fast, FilterType::NoFilter);
        image::DynamicImage::ImageRgb8(pixels.clone())
            .write_with_encoder(encoder)
            .unwrap();

        let out = compress_image(None, FileRecord::new("logo.png", "", Some(input.clone()))).unwrap();
        let bytes = out.contents.unwrap();
        assert!(bytes.len() <= input.len());
        assert_eq!(image::load_from_memory(&bytes).unwrap().to_rgb8(), pixels);
    }

    #[cfg(unix)]
    #[test]
    fn test_text_transform_with_external_tool() {
        let transform = text_transform(
            Some(vec!["tr".to_string(), "a-z".to_string(), "A-Z".to_string()]),
            |source| Ok(minify_js(source)),
        );
        let out = transform(FileRecord::new("a.js", "", Some(b"var a;".to_vec()))).unwrap();
        assert_eq!(out.text().unwrap(), "VAR A;");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_an_error() {
        let err = run_tool(&["false".to_string()], b"").unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }
}
