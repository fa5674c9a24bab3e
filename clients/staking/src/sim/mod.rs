mod masterchef;

pub use masterchef::MasterChef;
