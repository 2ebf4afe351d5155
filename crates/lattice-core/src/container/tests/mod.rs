// Container test module
mod support;

mod lifecycle_tests;
