// Pipeline processing: normalization, validation, enrichment and merging

pub mod enrich;
pub mod merge;
pub mod normalize;
pub mod validate;
