mod credential;
mod license;
mod nonce;
mod package;

pub use credential::*;
pub use license::*;
pub use nonce::*;
pub use package::*;
