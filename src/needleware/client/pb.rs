//! Wire types plus client and server stubs for the `needleware.Needleware`
//! service, generated from `proto/needleware.proto` by `build.rs`.

tonic::include_proto!("needleware");
