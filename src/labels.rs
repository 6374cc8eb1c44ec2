//! Shared set of class labels from the most recently processed frame.

use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock},
};

use itertools::Itertools;

/// Labels of the last fully processed frame.
///
/// The pipeline is the sole writer and publishes a complete replacement set
/// per frame. Readers clone the current `Arc` under a brief read lock, so a
/// query running while the pipeline is mid-frame still sees the previous
/// frame's complete set, never a partially built one.
#[derive(Default)]
pub struct LabelStore {
    current: RwLock<Arc<BTreeSet<String>>>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published set with the labels of a freshly processed frame.
    /// Duplicates collapse; labels from earlier frames do not survive.
    pub fn publish<I>(&self, labels: I)
    where
        I: IntoIterator<Item = String>,
    {
        let set: Arc<BTreeSet<String>> = Arc::new(labels.into_iter().collect());
        *self.current.write().unwrap() = set;
    }

    pub fn snapshot(&self) -> Arc<BTreeSet<String>> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Caption text for the frame overlay, e.g. `"cat, person"`.
    /// Empty string if the last frame had no detections.
    pub fn caption(&self) -> String {
        self.snapshot().iter().join(", ")
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.snapshot().iter().cloned().collect()
    }
}
