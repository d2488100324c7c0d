//! Integration tests for the crosswire workspace; see `tests/`.
