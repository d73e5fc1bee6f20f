//! Core replicated types for Coedit.
//!
//! - [`node`]: character identities and the [`CharacterNode`] record
//! - [`tree`]: the [`ReplicatedTree`] that orders and materializes text
//! - [`lattice`]: the join-semilattice trait the tree implements
//! - [`clock`]: wall-clock sources used to stamp new characters

pub mod clock;
pub mod error;
pub mod lattice;
pub mod node;
pub mod tree;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::TreeError;
pub use lattice::Lattice;
pub use node::{AuthorId, CharId, CharacterNode, ParentId, ROOT_ID};
pub use tree::{Reparent, ReplicatedTree, TreeSnapshot};
