use crate::model::object_id::ObjectId;
use std::fmt::{Display, Formatter};

/// `(object, relation property)` pair naming one relation end point.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationEndPointId {
    pub object: ObjectId,
    pub property: String,
}

impl RelationEndPointId {
    pub fn new(object: ObjectId, property: impl Into<String>) -> Self {
        Self {
            object,
            property: property.into(),
        }
    }

    /// Smallest id owned by `object`; used as a range start.
    pub(crate) fn first_of(object: &ObjectId) -> Self {
        Self::new(object.clone(), String::new())
    }
}

impl Display for RelationEndPointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.object, self.property)
    }
}

/// Snapshot of one end point as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationEndPoint {
    /// Foreign-key side, backed by the owner's data container.
    RealObject {
        id: RelationEndPointId,
        current: Option<ObjectId>,
        original: Option<ObjectId>,
        touched: bool,
    },
    VirtualObject {
        id: RelationEndPointId,
        current: Option<ObjectId>,
        original: Option<ObjectId>,
        touched: bool,
    },
    VirtualCollection {
        id: RelationEndPointId,
        current: Vec<ObjectId>,
        original: Vec<ObjectId>,
        complete: bool,
        touched: bool,
    },
}

impl RelationEndPoint {
    pub fn id(&self) -> &RelationEndPointId {
        match self {
            Self::RealObject { id, .. }
            | Self::VirtualObject { id, .. }
            | Self::VirtualCollection { id, .. } => id,
        }
    }

    pub fn is_virtual(&self) -> bool {
        !matches!(self, Self::RealObject { .. })
    }

    /// One-valued sides are always complete once they exist.
    pub fn is_data_complete(&self) -> bool {
        match self {
            Self::VirtualCollection { complete, .. } => *complete,
            _ => true,
        }
    }

    pub fn is_touched(&self) -> bool {
        match self {
            Self::RealObject { touched, .. }
            | Self::VirtualObject { touched, .. }
            | Self::VirtualCollection { touched, .. } => *touched,
        }
    }

    pub fn has_changed(&self) -> bool {
        match self {
            Self::RealObject {
                current, original, ..
            }
            | Self::VirtualObject {
                current, original, ..
            } => current != original,
            Self::VirtualCollection {
                current, original, ..
            } => current != original,
        }
    }

    /// Related ids in current order.
    pub fn related_ids(&self) -> Vec<ObjectId> {
        match self {
            Self::RealObject { current, .. } | Self::VirtualObject { current, .. } => {
                current.iter().cloned().collect()
            }
            Self::VirtualCollection { current, .. } => current.clone(),
        }
    }
}

/// Stored one-valued virtual side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct VirtualObjectEndPoint {
    pub current: Option<ObjectId>,
    pub original: Option<ObjectId>,
    pub touched: bool,
}

impl VirtualObjectEndPoint {
    pub fn loaded(related: Option<ObjectId>) -> Self {
        Self {
            current: related.clone(),
            original: related,
            touched: false,
        }
    }
}

/// Stored collection side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct VirtualCollectionEndPoint {
    pub current: Vec<ObjectId>,
    pub original: Vec<ObjectId>,
    pub complete: bool,
    pub touched: bool,
}

impl VirtualCollectionEndPoint {
    pub fn complete(items: Vec<ObjectId>) -> Self {
        Self {
            current: items.clone(),
            original: items,
            complete: true,
            touched: false,
        }
    }

    /// Holds only incidentally discovered members until first full access.
    pub fn incomplete(items: Vec<ObjectId>) -> Self {
        Self {
            current: items.clone(),
            original: items,
            complete: false,
            touched: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VirtualEndPoint {
    Object(VirtualObjectEndPoint),
    Collection(VirtualCollectionEndPoint),
}

impl VirtualEndPoint {
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Object(_) => true,
            Self::Collection(end_point) => end_point.complete,
        }
    }

    pub fn has_changed(&self) -> bool {
        match self {
            Self::Object(end_point) => end_point.current != end_point.original,
            Self::Collection(end_point) => end_point.current != end_point.original,
        }
    }

    pub fn is_touched(&self) -> bool {
        match self {
            Self::Object(end_point) => end_point.touched,
            Self::Collection(end_point) => end_point.touched,
        }
    }

    pub fn touch(&mut self) {
        match self {
            Self::Object(end_point) => end_point.touched = true,
            Self::Collection(end_point) => end_point.touched = true,
        }
    }

    pub fn commit(&mut self) {
        match self {
            Self::Object(end_point) => {
                end_point.original = end_point.current.clone();
                end_point.touched = false;
            }
            Self::Collection(end_point) => {
                end_point.original = end_point.current.clone();
                end_point.touched = false;
            }
        }
    }

    pub fn rollback(&mut self) {
        match self {
            Self::Object(end_point) => {
                end_point.current = end_point.original.clone();
                end_point.touched = false;
            }
            Self::Collection(end_point) => {
                end_point.current = end_point.original.clone();
                end_point.touched = false;
            }
        }
    }

    /// Replaces current contents with those of `other`, keeping this baseline.
    pub fn merge_from(&mut self, other: &VirtualEndPoint) {
        match (self, other) {
            (Self::Object(target), Self::Object(source)) => {
                target.current = source.current.clone();
                target.touched |= source.touched || source.current != source.original;
            }
            (Self::Collection(target), Self::Collection(source)) => {
                target.current = source.current.clone();
                target.complete = true;
                target.touched |= source.touched || source.current != source.original;
            }
            _ => {}
        }
    }

    pub fn snapshot(&self, id: RelationEndPointId) -> RelationEndPoint {
        match self {
            Self::Object(end_point) => RelationEndPoint::VirtualObject {
                id,
                current: end_point.current.clone(),
                original: end_point.original.clone(),
                touched: end_point.touched,
            },
            Self::Collection(end_point) => RelationEndPoint::VirtualCollection {
                id,
                current: end_point.current.clone(),
                original: end_point.original.clone(),
                complete: end_point.complete,
                touched: end_point.touched,
            },
        }
    }
}
