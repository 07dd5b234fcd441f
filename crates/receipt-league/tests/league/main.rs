mod api_test;
mod helpers;
mod ingestion_test;
mod winner_test;
