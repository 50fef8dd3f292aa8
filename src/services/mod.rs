pub mod embedding_provider;
