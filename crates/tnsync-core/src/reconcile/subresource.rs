// ── Ordered sub-resources ──
//
// Three-way comparison of a desired entry list against an indexed observed
// list (jail fstab lines). Entries are matched by key; the result is a
// list of ADD / REPLACE / REMOVE operations in a stable order.

/// One desired entry in an ordered sub-resource list.
pub trait Entry {
    /// Observed entry type.
    type Observed;

    /// Matching key (the mount point for fstab lines).
    fn key(&self) -> &str;

    /// `false` when the entry should be removed.
    fn present(&self) -> bool;

    /// Whether the observed entry differs in a way that needs REPLACE.
    fn differs_from(&self, observed: &Self::Observed) -> bool;
}

/// An observed entry with its position in the remote list.
pub trait Indexed {
    fn index(&self) -> usize;
    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOp<'a, D, O> {
    Add(&'a D),
    Replace { desired: &'a D, observed: &'a O },
    Remove(&'a O),
}

/// Compute the operations that turn `observed` into `desired`.
///
/// Desired entries are processed in order; unlisted observed entries are
/// removed afterwards unless `append` is set.
pub fn plan_entries<'a, D, O>(
    desired: &'a [D],
    observed: &'a [O],
    append: bool,
) -> Vec<EntryOp<'a, D, O>>
where
    D: Entry<Observed = O>,
    O: Indexed,
{
    let mut ops = Vec::new();

    for want in desired {
        let found = observed.iter().find(|o| o.key() == want.key());
        match (found, want.present()) {
            (None, true) => ops.push(EntryOp::Add(want)),
            (None, false) => {}
            (Some(have), false) => ops.push(EntryOp::Remove(have)),
            (Some(have), true) => {
                if want.differs_from(have) {
                    ops.push(EntryOp::Replace {
                        desired: want,
                        observed: have,
                    });
                }
            }
        }
    }

    if !append {
        for have in observed {
            if !desired.iter().any(|d| d.key() == have.key()) {
                ops.push(EntryOp::Remove(have));
            }
        }
    }

    ops
}

// ── Tests ────────────────────────────────────────────────────────────
