//! Tri-state slot used by the raw and changed layers of a document.
//!
//! A stored `null` is a legitimate value ([`Marker::Present`] of a null BSON value),
//! which is why absence and "not loaded" get their own variants instead of
//! borrowing from the value space.

/// The state of one attribute in a storage layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker<T> {
    /// The attribute holds a value.
    Present(T),
    /// The attribute was absent from the wire data, or has been deleted.
    NotSet,
    /// The attribute exists in the store but was excluded by a projection.
    NotLoaded,
}

impl<T> Marker<T> {
    /// Returns `true` if the marker holds a value.
    pub fn is_present(&self) -> bool {
        matches!(self, Marker::Present(_))
    }

    /// Returns `true` if the marker is [`Marker::NotLoaded`].
    pub fn is_not_loaded(&self) -> bool {
        matches!(self, Marker::NotLoaded)
    }

    /// Converts into an `Option`, discarding the distinction between the two markers.
    pub fn present(self) -> Option<T> {
        match self {
            Marker::Present(value) => Some(value),
            Marker::NotSet | Marker::NotLoaded => None,
        }
    }

    /// Borrows the contained value.
    pub fn as_ref(&self) -> Marker<&T> {
        match self {
            Marker::Present(value) => Marker::Present(value),
            Marker::NotSet => Marker::NotSet,
            Marker::NotLoaded => Marker::NotLoaded,
        }
    }

    /// Maps the contained value, leaving markers untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Marker<U> {
        match self {
            Marker::Present(value) => Marker::Present(f(value)),
            Marker::NotSet => Marker::NotSet,
            Marker::NotLoaded => Marker::NotLoaded,
        }
    }
}

impl<T> From<Option<T>> for Marker<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Marker::Present(value),
            None => Marker::NotSet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_distinct_from_present_null() {
        let null: Marker<Option<i32>> = Marker::Present(None);

        assert_ne!(null, Marker::NotSet);
        assert_ne!(null, Marker::NotLoaded);
        assert_ne!(Marker::<i32>::NotSet, Marker::NotLoaded);
    }

    #[test]
    fn map_keeps_markers() {
        assert_eq!(Marker::Present(2).map(|v| v * 2), Marker::Present(4));
        assert_eq!(Marker::<i32>::NotLoaded.map(|v| v * 2), Marker::NotLoaded);
        assert_eq!(Marker::<i32>::NotSet.present(), None);
    }
}
