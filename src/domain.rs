pub mod partner;
pub mod ports;

pub use partner::*;
pub use ports::PartnerRepository;
