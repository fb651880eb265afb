/// Which lifecycle change an event reports.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum EventKind {
    Entered,
    Left,
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// The wire `op` for this kind.
    pub fn op(self) -> &'static str {
        match self {
            Self::Entered => "enter",
            Self::Left => "leave",
            Self::Created => "create",
            Self::Updated => "update",
            Self::Deleted => "delete",
        }
    }
}

/// An object lifecycle change pushed by the server for one subscription.
///
/// - `Entered`: the object was updated and now matches the query.
/// - `Left`: the object was updated and no longer matches.
/// - `Created`: the object was created and matches.
/// - `Updated`: the object was updated and still matches.
/// - `Deleted`: the object was deleted.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Entered(T),
    Left(T),
    Created(T),
    Updated(T),
    Deleted(T),
}

impl<T> Event<T> {
    pub fn new(kind: EventKind, object: T) -> Self {
        match kind {
            EventKind::Entered => Self::Entered(object),
            EventKind::Left => Self::Left(object),
            EventKind::Created => Self::Created(object),
            EventKind::Updated => Self::Updated(object),
            EventKind::Deleted => Self::Deleted(object),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Entered(_) => EventKind::Entered,
            Self::Left(_) => EventKind::Left,
            Self::Created(_) => EventKind::Created,
            Self::Updated(_) => EventKind::Updated,
            Self::Deleted(_) => EventKind::Deleted,
        }
    }

    pub fn object(&self) -> &T {
        match self {
            Self::Entered(o) | Self::Left(o) | Self::Created(o) | Self::Updated(o) | Self::Deleted(o) => o,
        }
    }

    pub fn into_object(self) -> T {
        match self {
            Self::Entered(o) | Self::Left(o) | Self::Created(o) | Self::Updated(o) | Self::Deleted(o) => o,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        let kind = self.kind();
        Event::new(kind, f(self.into_object()))
    }
}
