pub mod reconciler;
pub mod view;
