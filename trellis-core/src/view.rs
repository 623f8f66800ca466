// View rendering collaborator

use crate::Error;
use serde_json::Value;

/// Container id the kernel looks up when rendering error pages
pub const VIEW: &str = "view";

/// Renders named views; the templating engine itself lives outside the core.
///
/// Bind an implementation as `Arc<dyn ViewRenderer>` under [`VIEW`].
pub trait ViewRenderer: Send + Sync {
    fn exists(&self, view: &str) -> bool;

    fn render(&self, view: &str, data: &Value) -> Result<String, Error>;
}
