// Test modules for Huddle
// Each module covers one part of the messaging core

mod channel_tests;
mod store_tests;
