//! Collaborators shared by every assessment operation.

use std::sync::Arc;

use super::grading::Grader;
use crate::item_bank::ItemBank;
use crate::storage::Storage;

/// The engine's external collaborators: the session store, the grading
/// service and the read-only item bank.
///
/// Each is held behind a trait object so tests can swap in mocks or an
/// in-memory database.
#[derive(Clone)]
pub struct AssessmentCore {
    storage: Arc<dyn Storage>,
    grader: Arc<dyn Grader>,
    item_bank: Arc<dyn ItemBank>,
}

impl AssessmentCore {
    pub fn new(
        storage: Arc<dyn Storage>,
        grader: Arc<dyn Grader>,
        item_bank: Arc<dyn ItemBank>,
    ) -> Self {
        Self {
            storage,
            grader,
            item_bank,
        }
    }

    #[inline]
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    #[inline]
    pub fn grader(&self) -> &dyn Grader {
        self.grader.as_ref()
    }

    #[inline]
    pub fn item_bank(&self) -> &dyn ItemBank {
        self.item_bank.as_ref()
    }
}
