mod vault;

pub use vault::SimVault;
