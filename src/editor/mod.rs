use crate::autosave::SaveTarget;
use crate::remote::MARKDOWN_MIME;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Filename used for exports and as the default remote document name.
pub const EXPORT_FILENAME: &str = "note.md";

/// Canonical in-memory document text. The sole source of truth for editor
/// content; replaced wholesale, never destroyed during a session. Every
/// mutation bumps a revision that save and render workers watch.
pub struct DocumentBuffer {
    text: Mutex<String>,
    revision: watch::Sender<u64>,
}

impl DocumentBuffer {
    pub fn new(initial: impl Into<String>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            text: Mutex::new(initial.into()),
            revision,
        }
    }

    /// Wholesale replacement. Keystrokes and every load path land here.
    pub fn replace(&self, text: impl Into<String>) {
        *self.text.lock().unwrap() = text.into();
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.text.lock().unwrap().is_empty()
    }

    /// Subscribes to revision bumps. The receiver starts caught-up, so only
    /// mutations after this call wake it.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Starter document for sessions with no cached content.
pub fn welcome_template() -> &'static str {
    "# Welcome to Tidemark\n\nA markdown scratchpad that keeps itself saved.\n\n\
     - Edit freely; changes autosave to the local cache after a short pause.\n\
     - Configure a remote folder to keep the document synced off this machine.\n\
     - Export anytime as `note.md`.\n\n\
     ## Tips\n\
     1. Edits persist locally without any action on your part.\n\
     2. Remote saves batch bursts of edits into one upload.\n\
     3. Share a snapshot to a paste service when you need a link.\n"
}

/// Markdown-to-markup capability. Out of scope for the core; provided by the
/// embedding surface when it has one.
pub trait MarkupParser: Send + Sync {
    fn parse(&self, markdown: &str) -> Result<String, String>;
}

/// Markup sanitizing capability, also optional.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, markup: &str) -> Result<String, String>;
}

/// Preview renderer. Absence of either capability is a documented
/// degradation, not an error: no parser passes raw text through, no
/// sanitizer passes markup through unsanitized.
pub struct RenderPipeline {
    parser: Option<Arc<dyn MarkupParser>>,
    sanitizer: Option<Arc<dyn Sanitizer>>,
}

impl RenderPipeline {
    pub fn new(
        parser: Option<Arc<dyn MarkupParser>>,
        sanitizer: Option<Arc<dyn Sanitizer>>,
    ) -> Self {
        Self { parser, sanitizer }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Renders the preview. Never fails: capability errors are folded into an
    /// inline diagnostic block in place of the preview.
    pub fn render(&self, markdown: &str) -> String {
        let markup = match &self.parser {
            Some(parser) => match parser.parse(markdown) {
                Ok(markup) => markup,
                Err(message) => return render_error(&message),
            },
            None => markdown.to_string(),
        };
        match &self.sanitizer {
            Some(sanitizer) => match sanitizer.sanitize(&markup) {
                Ok(clean) => clean,
                Err(message) => render_error(&message),
            },
            None => markup,
        }
    }
}

fn render_error(message: &str) -> String {
    format!("<pre class=\"render-error\">render failed: {message}</pre>")
}

/// Debounce target that publishes rendered previews on a watch channel.
pub struct RenderTarget {
    pipeline: RenderPipeline,
    output: watch::Sender<String>,
}

impl RenderTarget {
    /// Renders `initial` eagerly so the preview is populated at boot, before
    /// the first debounced pass.
    pub fn new(pipeline: RenderPipeline, initial: &str) -> (Self, watch::Receiver<String>) {
        let (output, preview) = watch::channel(pipeline.render(initial));
        (Self { pipeline, output }, preview)
    }
}

#[async_trait]
impl SaveTarget for RenderTarget {
    fn name(&self) -> &'static str {
        "render"
    }

    async fn persist(&self, snapshot: &str) -> Result<(), String> {
        self.output.send_replace(self.pipeline.render(snapshot));
        Ok(())
    }
}

/// Bytes and metadata handed to a "download the document" action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentExport {
    pub filename: String,
    pub mime: String,
    pub content: String,
}

impl DocumentExport {
    pub fn of(content: String) -> Self {
        Self {
            filename: EXPORT_FILENAME.to_string(),
            mime: MARKDOWN_MIME.to_string(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShoutingParser;

    impl MarkupParser for ShoutingParser {
        fn parse(&self, markdown: &str) -> Result<String, String> {
            Ok(format!("<p>{}</p>", markdown.to_uppercase()))
        }
    }

    struct FailingParser;

    impl MarkupParser for FailingParser {
        fn parse(&self, _markdown: &str) -> Result<String, String> {
            Err("unbalanced emphasis".to_string())
        }
    }

    struct TagStripper;

    impl Sanitizer for TagStripper {
        fn sanitize(&self, markup: &str) -> Result<String, String> {
            Ok(markup.replace("<script>", "").replace("</script>", ""))
        }
    }

    #[test]
    fn replace_bumps_revision_and_snapshot() {
        let buffer = DocumentBuffer::new("one");
        assert_eq!(buffer.revision(), 0);
        buffer.replace("two");
        assert_eq!(buffer.revision(), 1);
        assert_eq!(buffer.snapshot(), "two");
        assert!(!buffer.is_empty());
    }

    #[tokio::test]
    async fn watchers_wake_on_mutation() {
        let buffer = DocumentBuffer::new("");
        let mut revisions = buffer.watch();
        buffer.replace("# hi");
        revisions.changed().await.unwrap();
        assert_eq!(*revisions.borrow_and_update(), 1);
    }

    #[test]
    fn render_without_parser_passes_raw_text() {
        let pipeline = RenderPipeline::disabled();
        assert_eq!(pipeline.render("# raw"), "# raw");
    }

    #[test]
    fn render_uses_parser_then_sanitizer() {
        let pipeline = RenderPipeline::new(
            Some(Arc::new(ShoutingParser)),
            Some(Arc::new(TagStripper)),
        );
        assert_eq!(pipeline.render("hi"), "<p>HI</p>");
    }

    #[test]
    fn render_without_sanitizer_passes_markup_through() {
        let pipeline = RenderPipeline::new(Some(Arc::new(ShoutingParser)), None);
        assert_eq!(pipeline.render("hi"), "<p>HI</p>");
    }

    #[test]
    fn parser_failure_becomes_inline_diagnostic() {
        let pipeline = RenderPipeline::new(Some(Arc::new(FailingParser)), None);
        let rendered = pipeline.render("whatever");
        assert!(rendered.contains("render-error"));
        assert!(rendered.contains("unbalanced emphasis"));
    }

    #[tokio::test]
    async fn render_target_publishes_previews() {
        let (target, mut preview) = RenderTarget::new(RenderPipeline::disabled(), "# boot");
        assert_eq!(*preview.borrow_and_update(), "# boot");

        target.persist("# edited").await.unwrap();
        assert_eq!(*preview.borrow_and_update(), "# edited");
    }

    #[test]
    fn export_carries_exact_content_and_mime() {
        let export = DocumentExport::of("# body\n".to_string());
        assert_eq!(export.filename, "note.md");
        assert_eq!(export.mime, "text/markdown; charset=utf-8");
        assert_eq!(export.content, "# body\n");
    }
}
