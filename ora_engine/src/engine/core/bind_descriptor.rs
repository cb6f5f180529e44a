use crate::protocol::{ScalarKind, Value, WireType};

/// Marshalling strategy of one bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindKind {
    #[default]
    Scalar,
    Null,
    Output,
    Batch,
    NullableBatch,
    BatchOutput,
    Cursor,
}

impl BindKind {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        self as usize
    }

    /// True when the descriptor's buffer is copied back after execute.
    pub fn is_output(self) -> bool {
        matches!(self, BindKind::Output | BindKind::BatchOutput | BindKind::Cursor)
    }

    pub fn is_batch(self) -> bool {
        matches!(
            self,
            BindKind::Batch | BindKind::NullableBatch | BindKind::BatchOutput
        )
    }
}

/// One parameter as handed to the provider. Owned by its statement until
/// the next bind pass or close, then returned to the pool for its kind.
#[derive(Debug, Clone, Default)]
pub struct BindDescriptor {
    pub kind: BindKind,
    /// 1-based placeholder position.
    pub position: usize,
    pub wire: WireType,
    pub scalar: Option<ScalarKind>,
    pub values: Vec<Option<Value>>,
    pub assoc_array: bool,
    /// Capacity in bytes of each element's buffer, for variable-length types.
    pub max_len: usize,
}

impl BindDescriptor {
    pub fn is_null(&self) -> bool {
        self.kind == BindKind::Null
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.wire = WireType::default();
        self.scalar = None;
        self.values.clear();
        self.assoc_array = false;
        self.max_len = 0;
    }
}
