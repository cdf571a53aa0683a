pub mod approve;
pub mod events;
pub mod index;
pub mod land;
pub mod resolve;

pub use approve::{Approve, ApproveList};
pub use events::{ChangeKind, LandChange};
pub use index::{Lands, LandsError, NewLand};
pub use land::{Land, LandId, LandType, RentInfo, SaleInfo, SignLocation};
