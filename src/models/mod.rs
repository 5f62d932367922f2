//! Model components and the bundle they form

pub mod bundle;
pub mod codec;
pub mod estimator;

pub use bundle::{ModelBundle, StoredBundle};
pub use estimator::{
    Classifier, FeatureTransform, IdentityTransform, LogisticRegression, StandardScaler,
};
