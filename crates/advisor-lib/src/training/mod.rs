//! Offline model training: dataset loading, class balancing, stratified
//! split, fitting and evaluation

mod balancer;
mod dataset;
mod metrics;
mod split;
mod trainer;

pub use balancer::{ClassBalancer, ClassDistribution};
pub use dataset::{load_dataset, DatasetSummary, LABEL_COLUMN};
pub use metrics::{ClassReport, ModelMetrics};
pub use split::{stratified_split, Split};
pub use trainer::{ModelTrainer, TrainedModel};
