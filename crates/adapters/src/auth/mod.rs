pub mod api_key_provider;
