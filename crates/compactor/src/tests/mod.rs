mod big_mode_tests;
mod helpers;
