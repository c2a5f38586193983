//! HTTP处理器
//!
//! 所有接口的资源可见性按属主隔离：同名资源在不同属主下互不
//! 可见。删除接口先删文件再删行。

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bfit_core::{utils::parse_dicom_date, AnalysisStatus, BfitError, Queue};
use bfit_database::{DatabaseQueries, InstanceUpsert, NewReport, SeriesUpsert, StudyUpsert};
use bfit_storage::report_path;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{username, AppState};

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "BFIT API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "1.0.0"
    }))
}

// ========== 检查接口 ==========

/// 上传DICOM文件批次
///
/// 聚合、协议分类、落盘落库一次完成。有系列匹配时返回201，
/// 整批无匹配时返回200和空结果。实例内容不回传，data恒为空串。
pub async fn upload_studies(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let owner = username(&headers);

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BfitError::Validation(format!("invalid multipart body: {}", e)))?
    {
        let filename = field
            .file_name()
            .map(str::to_string)
            .or_else(|| field.name().map(str::to_string))
            .unwrap_or_else(|| "upload.dcm".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| BfitError::Validation(format!("failed to read upload: {}", e)))?
            .to_vec();
        files.push((filename, data));
    }
    if files.is_empty() {
        return Err(BfitError::Validation("no files uploaded".to_string()).into());
    }
    info!("Upload of {} files by {}", files.len(), owner);

    let aggregator = state.aggregator.clone();
    let batch = tokio::task::spawn_blocking(move || aggregator.sort(files))
        .await
        .map_err(|e| BfitError::Internal(format!("aggregation task failed: {}", e)))??;

    let mut studies_up = Vec::new();
    let mut series_up = Vec::new();
    let mut instances_up = Vec::new();
    let mut response_studies = Vec::new();

    for (study_uid, series_map) in &batch.studies {
        let meta = batch.study_meta.get(study_uid);
        studies_up.push(StudyUpsert {
            study_id: study_uid.clone(),
            patient_id: meta.map(|m| m.patient_id.clone()),
            patient_name: meta.map(|m| m.patient_name.clone()),
            study_date: meta
                .and_then(|m| m.study_date.as_deref())
                .and_then(parse_dicom_date),
            owner: owner.clone(),
        });

        let mut series_json = Vec::new();
        for (series_uid, instances) in series_map {
            let series_meta = batch.series_meta.get(series_uid).ok_or_else(|| {
                BfitError::Internal(format!("missing series meta for {}", series_uid))
            })?;
            series_up.push(SeriesUpsert {
                series_id: series_uid.clone(),
                study_id: study_uid.clone(),
                modality: series_meta.modality,
                anatomy: series_meta.anatomy.clone(),
                num_frames: instances.len() as i64,
                owner: owner.clone(),
            });

            let mut instance_json = Vec::new();
            for instance in instances {
                let data = tokio::fs::read(&instance.path)
                    .await
                    .map_err(BfitError::Io)?;
                let path = bfit_storage::instance_path(
                    &owner,
                    study_uid,
                    series_uid,
                    &instance.filename,
                );
                state.storage.store_file(&path, &data).await?;
                instances_up.push(InstanceUpsert {
                    instance_id: instance.instance_id.clone(),
                    series_id: series_uid.clone(),
                    metadata: instance.metadata.clone(),
                    frame_number: instance.frame_number,
                    file: path.clone(),
                    owner: owner.clone(),
                });
                instance_json.push(json!({
                    "instance_id": instance.instance_id,
                    "frame_number": instance.frame_number,
                    "file": path,
                    "data": ""
                }));
            }

            series_json.push(json!({
                "series_id": series_uid,
                "modality": series_meta.modality.as_str(),
                "anatomy": series_meta.anatomy.as_str(),
                "instances": instance_json
            }));
        }

        response_studies.push(json!({
            "study_id": study_uid,
            "patient_id": meta.map(|m| m.patient_id.clone()),
            "patient_name": meta.map(|m| m.patient_name.clone()),
            "series": series_json
        }));
    }

    if !studies_up.is_empty() {
        DatabaseQueries::new(&state.pool)
            .ingest_batch(&studies_up, &series_up, &instances_up)
            .await?;
    }

    let status = if response_studies.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(json!({ "studies": response_studies }))).into_response())
}

/// 列出检查及其系列
pub async fn list_studies(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);

    let mut studies_json = Vec::new();
    for study in queries.list_studies(&owner).await? {
        let series = queries.list_series(study.id).await?;
        studies_json.push(study_to_json(&study, &series));
    }
    Ok(Json(json!({ "studies": studies_json })))
}

/// 获取单个检查
pub async fn get_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(study_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    let study = queries
        .get_study(&study_id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("study {}", study_id)))?;
    let series = queries.list_series(study.id).await?;
    Ok(Json(study_to_json(&study, &series)))
}

/// 删除检查及其全部文件与记录
///
/// 有处理中的分析作业时拒绝删除，避免作业完成后回写到已删除
/// 的记录。
pub async fn delete_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(study_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    let study = queries
        .get_study(&study_id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("study {}", study_id)))?;

    if queries.has_processing_analyses(study.id).await? {
        return Err(BfitError::Permission(format!(
            "study {} has analyses in progress",
            study_id
        ))
        .into());
    }

    for path in queries.study_file_paths(study.id).await? {
        state.storage.delete_if_exists(&path).await?;
    }
    queries.delete_study_rows(study.id).await?;
    info!("Deleted study {} of {}", study_id, owner);
    Ok(StatusCode::NO_CONTENT)
}

fn study_to_json(study: &bfit_core::Study, series: &[bfit_core::Series]) -> Value {
    json!({
        "study_id": study.study_id,
        "patient_id": study.patient_id,
        "patient_name": study.patient_name,
        "study_date": study.study_date,
        "created_at": study.created_at,
        "series": series.iter().map(|s| json!({
            "series_id": s.series_id,
            "modality": s.modality.as_str(),
            "anatomy": s.anatomy.as_str(),
            "num_frames": s.num_frames,
            "created_at": s.created_at
        })).collect::<Vec<_>>()
    })
}

// ========== 系列与实例接口 ==========

/// 按属主解析嵌套的检查/系列路径
async fn series_in_study(
    queries: &DatabaseQueries<'_>,
    study_id: &str,
    series_id: &str,
    owner: &str,
) -> Result<bfit_core::Series, BfitError> {
    let study = queries
        .get_study(study_id, owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("study {}", study_id)))?;
    let series = queries
        .get_series(series_id, owner)
        .await?
        .filter(|s| s.study_pk == study.id)
        .ok_or_else(|| BfitError::NotFound(format!("series {}", series_id)))?;
    Ok(series)
}

/// 删除系列及其全部文件与记录
pub async fn delete_series(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((study_id, series_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    let series = series_in_study(&queries, &study_id, &series_id, &owner).await?;

    if queries.has_processing_analyses_for_series(series.id).await? {
        return Err(BfitError::Permission(format!(
            "series {} has analyses in progress",
            series_id
        ))
        .into());
    }

    for path in queries.series_file_paths(series.id).await? {
        state.storage.delete_if_exists(&path).await?;
    }
    queries.delete_series_rows(series.id).await?;
    info!("Deleted series {} of {}", series_id, owner);
    Ok(StatusCode::NO_CONTENT)
}

/// 列出系列的实例，按帧号排序
pub async fn list_instances(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((study_id, series_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    let series = series_in_study(&queries, &study_id, &series_id, &owner).await?;

    let instances: Vec<Value> = queries
        .list_instances(series.id)
        .await?
        .into_iter()
        .map(|i| {
            json!({
                "instance_id": i.instance_id,
                "frame_number": i.frame_number,
                "metadata": i.metadata,
                "file": i.file
            })
        })
        .collect();
    Ok(Json(json!({ "instances": instances })))
}

// ========== 分析接口 ==========

#[derive(Debug, Deserialize)]
pub struct CreateAnalysisParams {
    pub series_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAnalysisBody {
    pub model_params: Option<Value>,
}

/// 创建分析作业
///
/// 系列未知时返回400而非404：提交接口把"找不到系列"当作
/// 请求参数错误对待。
pub async fn create_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CreateAnalysisParams>,
    body: Option<Json<CreateAnalysisBody>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let owner = username(&headers);
    let series_id = params
        .series_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BfitError::Validation("series_id is required".to_string()))?;
    let model_params = body.and_then(|Json(b)| b.model_params);

    let queries = DatabaseQueries::new(&state.pool);
    let series = queries
        .get_series(&series_id, &owner)
        .await?
        .ok_or_else(|| BfitError::Validation(format!("unknown series {}", series_id)))?;

    let analysis = state
        .dispatcher
        .dispatch(&series, model_params, &owner)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "job_id": analysis.id,
            "queue": analysis.queue.as_str(),
            "status": analysis.status.as_str()
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AnalysisListParams {
    pub series_id: Option<String>,
    pub queue: Option<String>,
}

/// 列出每个 (系列, 队列) 组合的最新分析
pub async fn list_analyses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AnalysisListParams>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queue = params
        .queue
        .as_deref()
        .map(Queue::parse)
        .transpose()
        .map_err(|_| BfitError::Validation(format!("unknown queue {:?}", params.queue)))?;

    let analyses: Vec<Value> = DatabaseQueries::new(&state.pool)
        .list_latest_analyses(&owner, params.series_id.as_deref(), queue)
        .await?
        .iter()
        .map(analysis_to_json)
        .collect();
    Ok(Json(json!({ "analyses": analyses })))
}

#[derive(Debug, Deserialize)]
pub struct CompletedParams {
    pub study_id: Option<String>,
    pub series_id: Option<String>,
}

/// 列出已完成的分析
pub async fn list_completed_analyses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CompletedParams>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let analyses: Vec<Value> = DatabaseQueries::new(&state.pool)
        .list_completed_analyses(&owner, params.study_id.as_deref(), params.series_id.as_deref())
        .await?
        .iter()
        .map(analysis_to_json)
        .collect();
    Ok(Json(json!({ "analyses": analyses })))
}

/// 详情接口的查询参数，artifacts可重复给出
#[derive(Debug, Default)]
struct AnalysisDetailParams {
    predictions: bool,
    segmentations: bool,
    artifacts: Vec<String>,
}

impl AnalysisDetailParams {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "predictions" => params.predictions = !value.is_empty(),
                "segmentations" => params.segmentations = !value.is_empty(),
                "artifacts" if !value.is_empty() => params.artifacts.push(value),
                _ => {}
            }
        }
        params
    }
}

/// 获取分析详情
///
/// 子记录按需附带：predictions与segmentations是开关参数，缺省
/// 不包含；artifacts按给出的类型token做大小写不敏感的子串OR
/// 过滤，一个token都没有时不包含。
pub async fn get_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let params = AnalysisDetailParams::from_pairs(pairs);
    let queries = DatabaseQueries::new(&state.pool);
    let analysis = queries
        .get_analysis(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("analysis {}", id)))?;

    let mut body = analysis_to_json(&analysis);
    if params.predictions {
        let predictions = queries.list_prediction_results(&id).await?;
        body["predictions"] = json!(predictions
            .iter()
            .map(|p| json!({ "prediction": p.prediction, "created_at": p.created_at }))
            .collect::<Vec<_>>());
    }
    if params.segmentations {
        let segmentations = queries.list_segmentation_results(&id).await?;
        body["segmentations"] = json!(segmentations
            .iter()
            .map(|s| json!({
                "mask_type": s.mask_type,
                "segmentation_mask": s.segmentation_mask,
                "is_custom": s.is_custom,
                "prediction_overrides": s.prediction_overrides
            }))
            .collect::<Vec<_>>());
    }
    if !params.artifacts.is_empty() {
        let tokens: Vec<String> = params.artifacts.iter().map(|t| t.to_lowercase()).collect();
        let mut artifacts = queries.list_artifacts(&id).await?;
        artifacts.retain(|a| {
            let artifact_type = a.artifact_type.to_lowercase();
            tokens.iter().any(|t| artifact_type.contains(t))
        });
        body["artifacts"] = json!(artifacts
            .iter()
            .map(|a| json!({ "artifact_type": a.artifact_type, "artifact": a.artifact }))
            .collect::<Vec<_>>());
    }
    let comment = queries.get_comment(&id).await?;
    let summary = queries.get_summary(&id).await?;
    body["comment"] = comment.map(|c| json!(c.comment)).unwrap_or(Value::Null);
    body["summary"] = summary.map(|s| json!(s.summary)).unwrap_or(Value::Null);
    Ok(Json(body))
}

/// 取消分析作业
pub async fn cancel_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let analysis = state
        .reconciler
        .cancel(state.runner.as_ref(), &id, &owner)
        .await?;
    Ok(Json(analysis_to_json(&analysis)))
}

/// 删除分析及其结果文件与记录
pub async fn delete_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    queries
        .get_analysis(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("analysis {}", id)))?;

    for path in queries.analysis_file_paths(&id).await? {
        state.storage.delete_if_exists(&path).await?;
    }
    queries.delete_analysis_rows(&id, &owner).await?;
    info!("Deleted analysis {} of {}", id, owner);
    Ok(StatusCode::NO_CONTENT)
}

fn analysis_to_json(analysis: &bfit_core::Analysis) -> Value {
    json!({
        "id": analysis.id,
        "queue": analysis.queue.as_str(),
        "series_pk": analysis.series_pk,
        "status": analysis.status.as_str(),
        "created_at": analysis.created_at,
        "ended_at": analysis.ended_at,
        "model_params": analysis.model_params
    })
}

// ========== 批注与小结接口 ==========

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub text: String,
}

/// 获取分析批注
pub async fn get_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    queries
        .get_analysis(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("analysis {}", id)))?;
    let comment = queries.get_comment(&id).await?;
    Ok(Json(json!({
        "comment": comment.map(|c| c.comment).unwrap_or_default()
    })))
}

/// 写入分析批注
pub async fn put_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<TextBody>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    queries
        .get_analysis(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("analysis {}", id)))?;
    let comment = queries.upsert_comment(&id, &body.text).await?;
    Ok(Json(json!({ "comment": comment.comment })))
}

/// 获取分析小结
pub async fn get_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    queries
        .get_analysis(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("analysis {}", id)))?;
    let summary = queries.get_summary(&id).await?;
    Ok(Json(json!({
        "summary": summary.map(|s| s.summary).unwrap_or_default()
    })))
}

/// 写入分析小结
pub async fn put_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<TextBody>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    queries
        .get_analysis(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("analysis {}", id)))?;
    let summary = queries.upsert_summary(&id, &body.text).await?;
    Ok(Json(json!({ "summary": summary.summary })))
}

// ========== 作业状态接口 ==========

#[derive(Debug, Deserialize)]
pub struct JobStatusParams {
    pub job_id: Option<String>,
}

/// 查询队列侧作业状态
///
/// job_id未知时返回500而非404，见[`ApiError`]。
pub async fn job_status(
    State(state): State<AppState>,
    Query(params): Query<JobStatusParams>,
) -> Result<Json<Value>, ApiError> {
    let job_id = params
        .job_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BfitError::Validation("job_id is required".to_string()))?;

    let job_state = state.runner.fetch_state(&job_id).await?;
    // 进程内队列不携带meta，结果经协调器落库，这里恒为null
    Ok(Json(json!({
        "id": job_id,
        "status": job_state.as_str(),
        "meta": Value::Null,
        "result": Value::Null
    })))
}

// ========== 报告接口 ==========

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub study_id: String,
    #[serde(default)]
    pub series: Vec<String>,
    pub filename: String,
    /// 报告文件内容，base64编码
    pub data: String,
}

/// 创建报告并存储其文件
pub async fn create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    queries
        .get_study(&request.study_id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("study {}", request.study_id)))?;

    let data = STANDARD
        .decode(&request.data)
        .map_err(|e| BfitError::Validation(format!("invalid base64 report data: {}", e)))?;

    let report_id = Uuid::new_v4().to_string();
    let path = report_path(&owner, &report_id, &request.filename);
    state.storage.store_file(&path, &data).await?;

    let report = queries
        .create_report(&NewReport {
            id: report_id,
            study_id: request.study_id,
            series: request.series,
            status: AnalysisStatus::Completed,
            file: Some(path),
            owner,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(report_to_json(&report))))
}

#[derive(Debug, Deserialize)]
pub struct ReportListParams {
    pub study_id: Option<String>,
}

/// 列出报告
pub async fn list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReportListParams>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let reports: Vec<Value> = DatabaseQueries::new(&state.pool)
        .list_reports(&owner, params.study_id.as_deref())
        .await?
        .iter()
        .map(report_to_json)
        .collect();
    Ok(Json(json!({ "reports": reports })))
}

/// 获取单个报告
pub async fn get_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let owner = username(&headers);
    let report = DatabaseQueries::new(&state.pool)
        .get_report(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("report {}", id)))?;
    Ok(Json(report_to_json(&report)))
}

/// 下载报告文件
pub async fn download_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let owner = username(&headers);
    let report = DatabaseQueries::new(&state.pool)
        .get_report(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("report {}", id)))?;
    let path = report
        .file
        .ok_or_else(|| BfitError::NotFound(format!("report {} has no file", id)))?;

    let data = state.storage.get_file(&path).await.map_err(|e| {
        warn!("Report {} references missing file {}: {}", id, path, e);
        BfitError::NotFound(format!("report file for {}", id))
    })?;
    let filename = path.rsplit('/').next().unwrap_or("report").to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response())
}

/// 删除报告及其文件
pub async fn delete_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let owner = username(&headers);
    let queries = DatabaseQueries::new(&state.pool);
    let report = queries
        .get_report(&id, &owner)
        .await?
        .ok_or_else(|| BfitError::NotFound(format!("report {}", id)))?;

    if let Some(path) = &report.file {
        state.storage.delete_if_exists(path).await?;
    }
    queries.delete_report_rows(&id, &owner).await?;
    info!("Deleted report {} of {}", id, owner);
    Ok(StatusCode::NO_CONTENT)
}

fn report_to_json(report: &bfit_core::Report) -> Value {
    json!({
        "id": report.id,
        "study_id": report.study_id,
        "series": report.series,
        "status": report.status.as_str(),
        "file": report.file,
        "created_at": report.created_at
    })
}
