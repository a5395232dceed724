/// Shader source boundary types
///
/// The renderer does not interpret the shading language itself. It accepts
/// source text plus a list of source-transform "detail" hints injected by a
/// pre-pass, hands both to the compiler, and reads back reflection data.

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Fragment shader
    Fragment,
}

/// A named source-transform hint (e.g. instancing support flags)
///
/// Hints are forwarded to the compiler as macro definitions; the renderer
/// never inspects their meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDetail {
    /// Hint name
    pub name: String,
    /// Hint value (empty string for flag-style hints)
    pub value: String,
}

/// Shader source text plus its transform hints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    /// Source text in the shading language
    pub text: String,
    /// Ordered detail hints, forwarded to the compiler
    pub details: Vec<ShaderDetail>,
}

impl ShaderSource {
    /// Wrap plain source text with no detail hints
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            details: Vec::new(),
        }
    }

    /// Add a detail hint
    pub fn with_detail(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push(ShaderDetail {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}
