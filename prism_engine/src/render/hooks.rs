/// Draw hooks - renderer extension points
///
/// A display node may attach an ordered list of hook records. The renderer
/// invokes matching callbacks at well-defined points around its operations
/// instead of threading function-pointer tables through the draw path.

/// Whether a hook runs before or after its operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Invoked before the operation executes
    Before,
    /// Invoked after the operation executes
    After,
}

/// The renderer operation a hook attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOperation {
    /// Frame recording begins (working state has been reset)
    BeginFrame,
    /// A draw call for the owning node
    Draw,
    /// Frame recording ends (before submission)
    EndFrame,
}

/// A single hook record
pub struct DrawHook {
    /// Before or after the operation
    pub phase: HookPhase,
    /// Which operation to attach to
    pub operation: HookOperation,
    /// The callback itself
    pub callback: Box<dyn FnMut() + Send>,
}

/// Ordered list of hook records attached to a display node
#[derive(Default)]
pub struct DrawHookList {
    hooks: Vec<DrawHook>,
}

impl DrawHookList {
    /// Create an empty hook list
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook record (invocation order is attachment order)
    pub fn attach(
        &mut self,
        phase: HookPhase,
        operation: HookOperation,
        callback: Box<dyn FnMut() + Send>,
    ) {
        self.hooks.push(DrawHook {
            phase,
            operation,
            callback,
        });
    }

    /// Invoke every hook matching the given phase and operation, in order
    pub fn invoke(&mut self, phase: HookPhase, operation: HookOperation) {
        for hook in &mut self.hooks {
            if hook.phase == phase && hook.operation == operation {
                (hook.callback)();
            }
        }
    }

    /// Number of attached hooks
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True if no hooks are attached
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
