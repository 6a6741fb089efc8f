//! Generated gRPC types for the coordinator wire protocol.
//!
//! See `proto/mapreduce.proto` for the request/reply shapes.

tonic::include_proto!("mapreduce");
