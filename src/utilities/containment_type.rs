/// How a node's child bounds relate to what is stored below them, as reported by
/// [`BoundingBox::contains`](super::BoundingBox::contains).
///
/// Tree validation requires every child slot to be [`ContainmentType::Contains`] for its subtree or
/// body. Bounds only grow between rebuilds, so anything else means a lost update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainmentType {
    /// No overlap at all.
    Disjoint,
    /// The outer box holds the inner box entirely, touching faces included.
    Contains,
    /// Partial overlap.
    Intersects,
}

impl ContainmentType {
    /// Whether the outer box fully holds the inner one.
    #[inline(always)]
    pub fn encloses(self) -> bool {
        self == ContainmentType::Contains
    }

    /// Whether the boxes share any point.
    #[inline(always)]
    pub fn touches(self) -> bool {
        self != ContainmentType::Disjoint
    }
}
