pub mod index_data;
