/// 卷发布流程

pub mod controller;
pub mod restore;

pub use controller::{PublishOutcome, PublishSettings, PublishUnpublishController, UnpublishOutcome};
pub use restore::RestoreOrchestrator;
