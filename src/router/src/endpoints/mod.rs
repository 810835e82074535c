pub mod delete_series;
