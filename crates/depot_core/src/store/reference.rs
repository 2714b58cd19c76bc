//! Lazy entity references resolved on first access.

use crate::model::record::Record;
use crate::store::lock::LockMode;
use crate::store::session::Session;
use crate::store::{StoreError, StoreResult};
use once_cell::unsync::OnceCell;

/// Lazy handle to an entity addressed by identifier.
///
/// Creation performs no store round trip. The row is fetched once on first
/// [`get`](Ref::get), at which point the entity becomes managed by the
/// owning unit of work; an absent row surfaces only then.
pub struct Ref<'s, E: Record> {
    session: &'s Session<'s>,
    id: E::Id,
    resolved: OnceCell<E>,
}

impl<'s, E: Record> Ref<'s, E> {
    pub(crate) fn new(session: &'s Session<'s>, id: E::Id) -> Self {
        Self {
            session,
            id,
            resolved: OnceCell::new(),
        }
    }

    /// The identifier this reference points at.
    pub fn id(&self) -> &E::Id {
        &self.id
    }

    /// Returns whether the deferred fetch has already happened.
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Resolves the reference, fetching the row on first access.
    ///
    /// # Errors
    /// - `NotFound` when the row is absent at access time.
    pub fn get(&self) -> StoreResult<&E> {
        self.resolved.get_or_try_init(|| {
            self.session
                .find::<E>(&self.id, LockMode::None)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: E::table(),
                    id: self.id.to_string(),
                })
        })
    }
}
