//! Tests for the IPC message layer.
