//! Packer registry.
//!
//! Resolves numeric packer ids during decoding. Well-known ids come from a
//! compiled-in table; generated service stubs register their record, enum and
//! proxy packers on top. The registry has an explicit lifecycle: the stub
//! builds one, then shares it by reference with the client or processor it
//! drives. There is no process-wide registry.

use std::collections::HashMap;

use crate::errors::PackerError;
use crate::packers::{self, Packer};

/// Id-to-packer resolution for one service.
#[derive(Debug, Clone, Default)]
pub struct PackerRegistry {
    custom: HashMap<i32, Packer>,
}

impl PackerRegistry {
    /// A registry with only the well-known table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stub packer under its own id.
    ///
    /// A packer registered under an id that is already taken replaces the
    /// earlier registration; stubs assign dense, non-overlapping ids.
    ///
    /// # Errors
    ///
    /// Fails when the packer has no id of its own (wrap it in
    /// [`Packer::Custom`] first).
    pub fn register(&mut self, packer: Packer) -> Result<i32, PackerError> {
        let id = packer.id().ok_or(PackerError::Unidentified(packer.name()))?;
        self.custom.insert(id, packer);
        Ok(id)
    }

    /// Resolve an id to a packer, consulting the well-known table first.
    pub fn resolve(&self, id: i32) -> Option<Packer> {
        well_known(id).or_else(|| self.custom.get(&id).cloned())
    }

    /// Whether the id resolves at all.
    pub fn knows(&self, id: i32) -> bool {
        well_known(id).is_some() || self.custom.contains_key(&id)
    }
}

/// The compiled-in table: primitives, homogeneous containers over them, and
/// the HeteroMap packer.
pub fn well_known(id: i32) -> Option<Packer> {
    match id {
        packers::ID_INT8 => Some(Packer::Int8),
        packers::ID_BOOL => Some(Packer::Bool),
        packers::ID_INT16 => Some(Packer::Int16),
        packers::ID_INT32 => Some(Packer::Int32),
        packers::ID_INT64 => Some(Packer::Int64),
        packers::ID_FLOAT => Some(Packer::Float),
        packers::ID_BUFFER => Some(Packer::Buffer),
        packers::ID_DATE => Some(Packer::Date),
        packers::ID_STR => Some(Packer::Str),
        packers::ID_NULL => Some(Packer::Null),
        800..=808 => container_element(id - packers::ID_LIST_BASE).map(|e| Packer::List(Box::new(e))),
        820..=828 => container_element(id - packers::ID_SET_BASE).map(|e| Packer::Set(Box::new(e))),
        packers::ID_MAP_INT32_INT32 => {
            Some(Packer::Map(Box::new(Packer::Int32), Box::new(Packer::Int32)))
        }
        packers::ID_MAP_INT32_STR => {
            Some(Packer::Map(Box::new(Packer::Int32), Box::new(Packer::Str)))
        }
        packers::ID_MAP_STR_INT32 => {
            Some(Packer::Map(Box::new(Packer::Str), Box::new(Packer::Int32)))
        }
        packers::ID_MAP_STR_STR => Some(Packer::Map(Box::new(Packer::Str), Box::new(Packer::Str))),
        packers::ID_HETEROMAP => Some(Packer::HeteroMap),
        _ => None,
    }
}

/// Element packer for offset `off` within the list/set id blocks.
fn container_element(off: i32) -> Option<Packer> {
    match off {
        0 => Some(Packer::Int8),
        1 => Some(Packer::Bool),
        2 => Some(Packer::Int16),
        3 => Some(Packer::Int32),
        4 => Some(Packer::Int64),
        5 => Some(Packer::Float),
        6 => Some(Packer::Buffer),
        7 => Some(Packer::Date),
        8 => Some(Packer::Str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::packers::RecordType;

    #[test]
    fn well_known_ids_resolve_to_matching_packers() {
        assert_eq!(well_known(1), Some(Packer::Int8));
        assert_eq!(well_known(10), Some(Packer::Null));
        assert_eq!(well_known(808), Some(Packer::List(Box::new(Packer::Str))));
        assert_eq!(well_known(820), Some(Packer::Set(Box::new(Packer::Int8))));
        assert_eq!(
            well_known(851),
            Some(Packer::Map(Box::new(Packer::Int32), Box::new(Packer::Str)))
        );
        assert_eq!(well_known(998), Some(Packer::HeteroMap));
        assert_eq!(well_known(0), None);
        assert_eq!(well_known(809), None);
        assert_eq!(well_known(999), None);
    }

    #[test]
    fn every_resolved_packer_reports_the_id_it_resolved_from() {
        let ids = (1..=10).chain(800..=808).chain(820..=828).chain(850..=853).chain([998]);
        for id in ids {
            let packer = well_known(id).unwrap();
            assert_eq!(packer.id(), Some(id));
        }
    }

    #[test]
    fn stub_packers_resolve_after_registration() {
        let mut registry = PackerRegistry::new();
        let shape: Arc<RecordType> = RecordType::new(900, "Address", vec![Packer::Str]);
        registry.register(Packer::Record(shape.clone())).unwrap();
        registry.register(Packer::ObjRef(1100)).unwrap();

        assert_eq!(registry.resolve(900), Some(Packer::Record(shape)));
        assert_eq!(registry.resolve(1100), Some(Packer::ObjRef(1100)));
        assert_eq!(registry.resolve(901), None);
    }

    #[test]
    fn unidentified_packers_cannot_be_registered() {
        let mut registry = PackerRegistry::new();
        let nested = Packer::List(Box::new(Packer::List(Box::new(Packer::Int32))));
        assert!(registry.register(nested.clone()).is_err());

        let id = registry.register(Packer::Custom { id: 1200, inner: Box::new(nested) }).unwrap();
        assert_eq!(id, 1200);
        assert!(registry.knows(1200));
    }
}
