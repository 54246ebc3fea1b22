//! HTTP endpoint handlers for the assembler API.
//!
//! Every handler is a thin shim: decode the request, call the
//! [`RemoteAssembler`], encode the result.

#![allow(clippy::missing_errors_doc)]

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};

use crate::protocol::{
    ChunkAck, ChunkQuery, CleanAck, CleanQuery, CommandOutput, MergeAck, MergeQuery,
    NegotiateQuery, RemotePathStat, StatQuery, TransferManifest, UnzipRequest, VersionInfo,
};

use super::error::{ApiResult, IntoApiResult};
use super::session::RemoteAssembler;

/// Shared handler state.
pub type SharedAssembler = Arc<RemoteAssembler>;

/// GET /stats
pub async fn stat(
    State(assembler): State<SharedAssembler>,
    Query(query): Query<StatQuery>,
) -> Json<RemotePathStat> {
    Json(assembler.stat(&query.dst_path).await)
}

/// GET /session/negotiate
pub async fn negotiate(
    State(assembler): State<SharedAssembler>,
    Query(query): Query<NegotiateQuery>,
) -> ApiResult<Json<TransferManifest>> {
    assembler.negotiate(&query).await.into_api_result().map(Json)
}

/// POST /session/chunk
///
/// The body is the raw chunk.
pub async fn upload_chunk(
    State(assembler): State<SharedAssembler>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> ApiResult<Json<ChunkAck>> {
    assembler
        .receive_chunk(&query, &body)
        .await
        .into_api_result()
        .map(Json)
}

/// POST /session/merge
pub async fn merge(
    State(assembler): State<SharedAssembler>,
    Query(query): Query<MergeQuery>,
) -> ApiResult<Json<MergeAck>> {
    assembler.merge(&query).await.into_api_result().map(Json)
}

/// POST /unzip
pub async fn unzip(
    State(assembler): State<SharedAssembler>,
    Json(request): Json<UnzipRequest>,
) -> ApiResult<Json<CommandOutput>> {
    assembler.unzip(&request).await.into_api_result().map(Json)
}

/// POST /clean
pub async fn clean(
    State(assembler): State<SharedAssembler>,
    Query(query): Query<CleanQuery>,
) -> ApiResult<Json<CleanAck>> {
    assembler.clean(&query).await.into_api_result().map(Json)
}

/// GET /version
pub async fn version(State(assembler): State<SharedAssembler>) -> Json<VersionInfo> {
    Json(assembler.version())
}
