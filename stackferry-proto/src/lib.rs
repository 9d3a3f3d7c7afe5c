//! Generated gRPC bindings for the Pulumi `ResourceProvider` surface, plus
//! conversions between protobuf `Struct` values and JSON.

pub mod pb;

pub mod pulumirpc {
    tonic::include_proto!("pulumirpc");
}
