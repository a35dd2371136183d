// Pipeline ingestion: reading collection files into raw records

pub mod importer;
