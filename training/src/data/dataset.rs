/// A minimal in-memory supervised dataset of scalar samples.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Returns
    /// `None` if `xs` and `ys` have different lengths.
    pub fn new(xs: Vec<f32>, ys: Vec<f32>) -> Option<Self> {
        if xs.len() != ys.len() {
            return None;
        }

        Some(Self { xs, ys })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    #[inline]
    pub fn xs(&self) -> &[f32] {
        &self.xs
    }

    #[inline]
    pub fn ys(&self) -> &[f32] {
        &self.ys
    }
}

/// An owned batch of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
}

impl Batch {
    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }
}
