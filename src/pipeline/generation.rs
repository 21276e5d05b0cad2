use std::time::Duration;

use thiserror::Error;

use crate::agent::Generator;
use crate::pipeline::state::{ArtifactSet, FileQueue};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator failed on {file}: {reason}")]
    Generator { file: String, reason: String },

    #[error("generator timed out on {file} after {secs}s")]
    Timeout { file: String, secs: u64 },

    #[error("duplicate file in plan: {0}")]
    DuplicateFile(String),
}

/// What the generator can see while producing one file.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub request: &'a str,
    pub plan: &'a str,
    /// Files already produced earlier in this pass, in order.
    pub completed: &'a ArtifactSet,
    /// Files still queued after the current one.
    pub remaining: &'a FileQueue,
}

/// Drains a file queue through the generator, one file at a time.
pub struct GenerationLoop<'g> {
    generator: &'g dyn Generator,
    timeout: Duration,
}

impl<'g> GenerationLoop<'g> {
    pub fn new(generator: &'g dyn Generator, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Generate every queued file in order.
    ///
    /// The artifact set is only returned once the queue is fully drained; any
    /// single failure aborts the pass and nothing partial escapes.
    pub async fn generate(
        &self,
        mut queue: FileQueue,
        request: &str,
        plan: &str,
    ) -> std::result::Result<ArtifactSet, GenerationError> {
        let mut files = ArtifactSet::new();

        while let Some(spec) = queue.pop_front() {
            if files.contains_key(&spec.name) {
                return Err(GenerationError::DuplicateFile(spec.name));
            }

            tracing::info!(
                file = %spec.name,
                done = files.len(),
                remaining = queue.len(),
                "Generating file"
            );

            let context = GenerationContext {
                request,
                plan,
                completed: &files,
                remaining: &queue,
            };

            let result =
                tokio::time::timeout(self.timeout, self.generator.generate(&spec, &context)).await;

            let raw = match result {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    return Err(GenerationError::Generator {
                        file: spec.name,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(GenerationError::Timeout {
                        file: spec.name,
                        secs: self.timeout.as_secs(),
                    });
                }
            };

            let code = strip_code_fences(&raw);
            tracing::debug!(file = %spec.name, bytes = code.len(), "Generated file");
            files.insert(spec.name, code);
        }

        Ok(files)
    }
}

const FENCE: &str = "```";

/// Extract generated code from a markdown fence.
///
/// Prose before the opening fence and after the closing fence line is
/// dropped. A language tag is only removed when it sits alone on the opening
/// line; the code between the fences is left untouched.
pub fn strip_code_fences(raw: &str) -> String {
    let text = raw.trim();
    let Some(open) = fence_line_start(text) else {
        return text.to_string();
    };
    let rest = &text[open + FENCE.len()..];

    let body = match rest.split_once('\n') {
        Some((tag, body)) if is_language_tag(tag) => body,
        Some(_) => rest,
        // Single-line fence
        None => return rest.strip_suffix(FENCE).unwrap_or(rest).trim().to_string(),
    };

    let mut end = body.len();
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim() == FENCE {
            end = offset;
            break;
        }
        offset += line.len();
    }
    let body = &body[..end];

    body.trim_end()
        .strip_suffix(FENCE)
        .unwrap_or(body)
        .trim()
        .to_string()
}

/// Byte offset of the first line that opens a fence.
fn fence_line_start(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with(FENCE) {
            return Some(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }
    None
}

fn is_language_tag(tag: &str) -> bool {
    tag.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::pipeline::state::FileSpec;

    /// Echoes the brief, remembering the context it was called with.
    struct EchoGenerator {
        seen: Mutex<Vec<(String, Vec<String>, usize)>>,
        fail_on: Option<&'static str>,
    }

    impl EchoGenerator {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, file: &FileSpec, ctx: &GenerationContext<'_>) -> Result<String> {
            self.seen.lock().unwrap().push((
                file.name.clone(),
                ctx.completed.keys().cloned().collect(),
                ctx.remaining.len(),
            ));
            if self.fail_on == Some(file.name.as_str()) {
                return Err(AppError::Generation("model refused".to_string()));
            }
            Ok(format!("```hcl\n# {}\n```", file.brief))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _file: &FileSpec, _ctx: &GenerationContext<'_>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    fn queue(names: &[&str]) -> FileQueue {
        names
            .iter()
            .map(|n| FileSpec::new(*n, format!("brief for {n}")))
            .collect()
    }

    #[tokio::test]
    async fn test_generates_in_queue_order() {
        let generator = EchoGenerator::new();
        let generation = GenerationLoop::new(&generator, Duration::from_secs(5));

        let files = generation
            .generate(queue(&["provider.tf", "main.tf", "outputs.tf"]), "req", "plan")
            .await
            .unwrap();

        let names: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["provider.tf", "main.tf", "outputs.tf"]);
        assert_eq!(files["main.tf"], "# brief for main.tf");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[1].1, vec!["provider.tf".to_string()]);
        assert_eq!(seen[1].2, 1);
        assert_eq!(seen[2].2, 0);
    }

    #[tokio::test]
    async fn test_duplicate_file_fails() {
        let generator = EchoGenerator::new();
        let generation = GenerationLoop::new(&generator, Duration::from_secs(5));

        let err = generation
            .generate(queue(&["main.tf", "provider.tf", "main.tf"]), "req", "plan")
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::DuplicateFile("main.tf".to_string()));
        assert_eq!(generator.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generator_failure_aborts_pass() {
        let generator = EchoGenerator {
            seen: Mutex::new(Vec::new()),
            fail_on: Some("main.tf"),
        };
        let generation = GenerationLoop::new(&generator, Duration::from_secs(5));

        let err = generation
            .generate(queue(&["provider.tf", "main.tf", "outputs.tf"]), "req", "plan")
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Generator { ref file, .. } if file == "main.tf"));
        // outputs.tf is never attempted
        assert_eq!(generator.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generator_timeout() {
        let generation = GenerationLoop::new(&SlowGenerator, Duration::from_millis(20));

        let err = generation
            .generate(queue(&["main.tf"]), "req", "plan")
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Timeout { ref file, .. } if file == "main.tf"));
    }

    #[test]
    fn test_strip_code_fences_with_language() {
        let raw = "```hcl\nresource \"aws_s3_bucket\" \"b\" {}\n```";
        assert_eq!(strip_code_fences(raw), "resource \"aws_s3_bucket\" \"b\" {}");
    }

    #[test]
    fn test_strip_code_fences_leaves_plain_code() {
        let raw = "  provider \"aws\" {\n  region = \"us-east-1\"\n}\n";
        assert_eq!(
            strip_code_fences(raw),
            "provider \"aws\" {\n  region = \"us-east-1\"\n}"
        );
    }

    #[test]
    fn test_strip_code_fences_keeps_interior() {
        let raw = "```terraform\nlocals {\n  doc = \"```\"\n}\n```\n";
        assert_eq!(strip_code_fences(raw), "locals {\n  doc = \"```\"\n}");
    }

    #[test]
    fn test_strip_code_fences_single_line_keeps_code() {
        let raw = "```resource \"aws_s3_bucket\" \"b\" {}```";
        assert_eq!(strip_code_fences(raw), "resource \"aws_s3_bucket\" \"b\" {}");
    }

    #[test]
    fn test_strip_code_fences_drops_surrounding_prose() {
        let raw = "Here is the file:\n```\nx = 1\n```\nSome trailing explanation";
        assert_eq!(strip_code_fences(raw), "x = 1");
    }

    #[test]
    fn test_strip_code_fences_code_on_opening_line() {
        let raw = "```resource \"aws_s3_bucket\" \"b\" {\n  bucket = \"logs\"\n}\n```";
        assert_eq!(
            strip_code_fences(raw),
            "resource \"aws_s3_bucket\" \"b\" {\n  bucket = \"logs\"\n}"
        );
    }
}
