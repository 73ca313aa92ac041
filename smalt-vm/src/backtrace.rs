//! Context-chain backtrace for abnormal termination.

use core::fmt;

use crate::image::CoreObjects;
use crate::object::{ClassRef, ContextRef, RawValue, SymbolRef};

/// One activation of the captured chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Name of the defining class of the running method.
    pub class: String,
    /// Selector of the running method.
    pub selector: String,
    /// Byte offset the activation stopped at.
    pub pc: usize,
}

/// Snapshot of the context chain, rendered into the error log when a
/// process aborts. The chain itself is left untouched for post-mortem
/// inspection.
#[derive(Debug, Clone, Default)]
pub struct Backtrace {
    frames: Vec<Frame>,
}

impl Backtrace {
    /// Walk the chain from `context` to the outermost activation.
    pub fn capture(core: &CoreObjects, context: RawValue) -> Self {
        let mut frames = Vec::new();
        let mut current = context;

        while !core.is_nil(current) && current.is_pointer() {
            let context = ContextRef::new(current.as_object());
            let method = context.method();
            let class = ClassRef::new(method.class().as_object());

            frames.push(Frame {
                class: SymbolRef::new(class.name().as_object()).as_str().to_owned(),
                selector: SymbolRef::new(method.selector().as_object())
                    .as_str()
                    .to_owned(),
                pc: context.pc(),
            });
            current = context.previous();
        }

        Self { frames }
    }

    /// Captured activations, innermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return f.write_str("<no live context>");
        }
        for (depth, frame) in self.frames.iter().enumerate() {
            if depth > 0 {
                f.write_str("\n")?;
            }
            write!(
                f,
                "  {} {}>>#{} (pc {})",
                depth, frame.class, frame.selector, frame.pc
            )?;
        }
        Ok(())
    }
}
