//! HTTP surface: the web UI, the MJPEG feed, and the enrollment /
//! recognition endpoints.

use crate::enrollment::{validate_subject_name, EnrollmentStore};
use crate::error::ApiError;
use crate::mailbox::Mailbox;
use crate::stream::{self, FeedEvent, FeedPublisher};
use crate::trainer::{SharedModel, TrainerHandle};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use bytes::Bytes;
use image::DynamicImage;
use rollcall_core::detect::{detect_faces, normalize_crop};
use rollcall_core::locator::FaceLocator;
use rollcall_core::types::confidence_from_distance;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone)]
pub struct AppState {
    pub store: EnrollmentStore,
    pub locator: Arc<dyn FaceLocator>,
    pub model: SharedModel,
    pub trainer: TrainerHandle,
    pub mailbox: Arc<Mailbox>,
    /// Present only when the camera opened; the photo endpoints work
    /// without it.
    pub feed: Option<FeedPublisher>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/salvar_foto", post(salvar_foto))
        .route("/reconhecer_foto", post(reconhecer_foto))
        .route("/get_recognized_name", get(get_recognized_name))
        .route("/treinar", post(treinar))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

#[derive(Deserialize)]
pub struct SalvarFotoRequest {
    pub nome: String,
    pub imagem: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub mensagem: String,
}

async fn salvar_foto(
    State(state): State<AppState>,
    Json(req): Json<SalvarFotoRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let nome = validate_subject_name(&req.nome)
        .map_err(|_| ApiError::InvalidSubjectName)?
        .to_owned();
    let image = decode_data_url(&req.imagem)?;

    // Detection and the crop are CPU-bound; keep them off the async runtime.
    let worker = state.clone();
    let subject = nome.clone();
    let index = tokio::task::spawn_blocking(move || -> Result<usize, ApiError> {
        let detected =
            detect_faces(worker.locator.as_ref(), &image).map_err(ApiError::internal)?;
        // Single-face policy: the first detector-ordered rectangle wins.
        let Some(rect) = detected.faces.first() else {
            return Err(ApiError::NoFaceDetected);
        };
        let crop = normalize_crop(&detected.gray, rect).ok_or(ApiError::NoFaceDetected)?;
        worker.store.record(&subject, &crop).map_err(ApiError::internal)
    })
    .await
    .map_err(ApiError::internal)??;

    let mensagem = if state.trainer.maybe_retrain(&nome, index) {
        "Imagem salva com sucesso! Treinamento iniciado.".to_string()
    } else {
        "Imagem salva com sucesso!".to_string()
    };
    Ok(Json(StatusResponse { status: "sucesso", mensagem }))
}

#[derive(Deserialize)]
pub struct ReconhecerFotoRequest {
    pub imagem: String,
}

#[derive(Serialize)]
pub struct ReconhecidoResponse {
    pub status: &'static str,
    pub aluno: String,
    pub confianca: i32,
}

async fn reconhecer_foto(
    State(state): State<AppState>,
    Json(req): Json<ReconhecerFotoRequest>,
) -> Result<Json<ReconhecidoResponse>, ApiError> {
    if state.model.read().is_none() {
        return Err(ApiError::ModelNotTrained);
    }
    let image = decode_data_url(&req.imagem)?;

    let worker = state.clone();
    let recognition = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let detected =
            detect_faces(worker.locator.as_ref(), &image).map_err(ApiError::internal)?;
        let Some(rect) = detected.faces.first() else {
            return Err(ApiError::NoFaceDetected);
        };
        let crop = normalize_crop(&detected.gray, rect).ok_or(ApiError::NoFaceDetected)?;

        let guard = worker.model.read();
        let model = guard.as_ref().ok_or(ApiError::ModelNotTrained)?;
        model
            .recognize(&crop)
            .map_err(ApiError::internal)?
            .ok_or(ApiError::NoSubjectRecognized)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(ReconhecidoResponse {
        status: "sucesso",
        aluno: recognition.subject,
        confianca: confidence_from_distance(recognition.distance).round() as i32,
    }))
}

/// Manual retrain: runs a full pass and waits for its report, unlike the
/// fire-and-forget pass the capture quota schedules.
async fn treinar(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let report = state
        .trainer
        .retrain_and_wait()
        .await
        .map_err(ApiError::internal)?;
    if !report.trained {
        return Err(ApiError::NoTrainingData);
    }
    Ok(Json(StatusResponse {
        status: "sucesso",
        mensagem: format!(
            "Modelo treinado com sucesso! ({} imagens, {} alunos)",
            report.samples, report.subjects
        ),
    }))
}

#[derive(Serialize)]
pub struct AlunoResponse {
    pub status: &'static str,
    pub aluno: String,
}

async fn get_recognized_name(
    State(state): State<AppState>,
) -> Result<Json<AlunoResponse>, ApiError> {
    match state.mailbox.poll() {
        Some(aluno) => Ok(Json(AlunoResponse { status: "sucesso", aluno })),
        None => Err(ApiError::MailboxEmpty),
    }
}

async fn video_feed(State(state): State<AppState>) -> Result<Response, ApiError> {
    let Some(feed) = &state.feed else {
        return Err(ApiError::CameraUnavailable);
    };
    let mut events = feed.subscribe();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(FeedEvent::Jpeg(jpeg)) => {
                    if tx.send(Ok(stream::multipart_part(&jpeg))).await.is_err() {
                        break; // client disconnected
                    }
                }
                Ok(FeedEvent::Terminated(cause)) => {
                    let _ = tx.send(Ok(stream::terminal_part(&cause))).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "video feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", stream::BOUNDARY),
        )
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(ApiError::internal)
}

/// Strip the `data:image/...;base64,` prefix (everything through the first
/// comma) and decode the remainder into an image.
fn decode_data_url(data_url: &str) -> Result<DynamicImage, ApiError> {
    let payload = match data_url.split_once(',') {
        Some((_, rest)) => rest,
        None => data_url,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| ApiError::ImageDecodeFailure)?;
    image::load_from_memory(&bytes).map_err(|_| ApiError::ImageDecodeFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::{spawn_trainer, CAPTURE_QUOTA};
    use axum::http::Request;
    use image::{GrayImage, Luma};
    use rollcall_core::locator::LocatorError;
    use rollcall_core::types::FaceRect;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct WholeFrameLocator;

    impl FaceLocator for WholeFrameLocator {
        fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceRect>, LocatorError> {
            let (w, h) = gray.dimensions();
            Ok(vec![FaceRect { x: 0, y: 0, width: w, height: h }])
        }
    }

    struct BlindLocator;

    impl FaceLocator for BlindLocator {
        fn locate(&self, _gray: &GrayImage) -> Result<Vec<FaceRect>, LocatorError> {
            Ok(vec![])
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        state: AppState,
    }

    fn fixture(locator: Arc<dyn FaceLocator>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(dir.path().join("imagens")).unwrap();
        let model = SharedModel::default();
        let trainer =
            spawn_trainer(store.clone(), Arc::clone(&model), dir.path().join("modelo.yml"));
        let state = AppState {
            store,
            locator,
            model,
            trainer,
            mailbox: Arc::new(Mailbox::new()),
            feed: None,
        };
        Fixture { _dir: dir, state }
    }

    /// A synthetic "face": a seeded checker texture, JPEG-encoded as a data
    /// URL the way the browser canvas submits it.
    fn face_data_url(seed: u32) -> String {
        encode_data_url(GrayImage::from_fn(160, 160, |x, y| {
            if ((x + seed) / 7 + y / 9) % 2 == 0 { Luma([210]) } else { Luma([45]) }
        }))
    }

    /// A second, structurally different texture family for a second subject.
    fn striped_data_url(seed: u32) -> String {
        encode_data_url(GrayImage::from_fn(160, 160, |_, y| {
            if ((y + seed) / 5) % 2 == 0 { Luma([230]) } else { Luma([25]) }
        }))
    }

    fn encode_data_url(img: GrayImage) -> String {
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg).encode_image(&img).unwrap();
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&jpeg)
        )
    }

    async fn post_json(state: &AppState, uri: &str, body: Value) -> Value {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get_json(state: &AppState, uri: &str) -> Value {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_salvar_rejects_invalid_names() {
        let fx = fixture(Arc::new(WholeFrameLocator));
        for nome in ["", "   ", "ana maria", "joão!"] {
            let resp = post_json(
                &fx.state,
                "/salvar_foto",
                json!({ "nome": nome, "imagem": face_data_url(0) }),
            )
            .await;
            assert_eq!(resp["status"], "erro", "nome {nome:?}");
            assert_eq!(resp["mensagem"], "Nome do aluno inválido!");
        }
    }

    #[tokio::test]
    async fn test_salvar_rejects_undecodable_image() {
        let fx = fixture(Arc::new(WholeFrameLocator));
        let resp = post_json(
            &fx.state,
            "/salvar_foto",
            json!({ "nome": "ana", "imagem": "data:image/jpeg;base64,@@@not-base64@@@" }),
        )
        .await;
        assert_eq!(resp["status"], "erro");
        assert_eq!(resp["mensagem"], "Falha ao decodificar a imagem!");
    }

    #[tokio::test]
    async fn test_salvar_reports_no_face() {
        let fx = fixture(Arc::new(BlindLocator));
        let resp = post_json(
            &fx.state,
            "/salvar_foto",
            json!({ "nome": "ana", "imagem": face_data_url(0) }),
        )
        .await;
        assert_eq!(resp["status"], "erro");
        assert_eq!(resp["mensagem"], "Nenhum rosto detectado!");
    }

    #[tokio::test]
    async fn test_salvar_sequence_and_quota_trigger() {
        let fx = fixture(Arc::new(WholeFrameLocator));

        for i in 0..CAPTURE_QUOTA {
            let resp = post_json(
                &fx.state,
                "/salvar_foto",
                json!({ "nome": "ana", "imagem": face_data_url(i as u32) }),
            )
            .await;
            assert_eq!(resp["status"], "sucesso");
            let mensagem = resp["mensagem"].as_str().unwrap();
            if i + 1 == CAPTURE_QUOTA {
                // Only the save that fills the quota reports training.
                assert!(mensagem.contains("Treinamento"), "save {i}: {mensagem}");
            } else {
                assert!(!mensagem.contains("Treinamento"), "save {i}: {mensagem}");
            }
        }

        assert_eq!(fx.state.store.image_count("ana").unwrap(), CAPTURE_QUOTA);

        // The scheduled retrain eventually swaps in a model; the follow-up
        // awaited pass makes the assertion deterministic.
        fx.state.trainer.retrain_and_wait().await.unwrap();
        assert!(fx.state.model.read().is_some());
    }

    #[tokio::test]
    async fn test_treinar_with_empty_store() {
        let fx = fixture(Arc::new(WholeFrameLocator));
        let resp = post_json(&fx.state, "/treinar", json!({})).await;
        assert_eq!(resp["status"], "erro");
        assert_eq!(resp["mensagem"], "Nenhuma face foi encontrada para treinamento.");
    }

    #[tokio::test]
    async fn test_reconhecer_before_training() {
        let fx = fixture(Arc::new(WholeFrameLocator));
        let resp = post_json(
            &fx.state,
            "/reconhecer_foto",
            json!({ "imagem": face_data_url(0) }),
        )
        .await;
        assert_eq!(resp["status"], "erro");
        assert_eq!(resp["mensagem"], "O modelo não foi treinado ainda.");
    }

    #[tokio::test]
    async fn test_enroll_then_recognize_round_trip() {
        let fx = fixture(Arc::new(WholeFrameLocator));

        for i in 0..3 {
            let resp = post_json(
                &fx.state,
                "/salvar_foto",
                json!({ "nome": "ana", "imagem": face_data_url(i) }),
            )
            .await;
            assert_eq!(resp["status"], "sucesso");
            let resp = post_json(
                &fx.state,
                "/salvar_foto",
                json!({ "nome": "bruno", "imagem": striped_data_url(i) }),
            )
            .await;
            assert_eq!(resp["status"], "sucesso");
        }
        let resp = post_json(&fx.state, "/treinar", json!({})).await;
        assert_eq!(resp["status"], "sucesso");
        assert!(resp["mensagem"].as_str().unwrap().contains("2 alunos"));

        // Each probe must decode to its own subject through the table
        // persisted at training time.
        let resp = post_json(
            &fx.state,
            "/reconhecer_foto",
            json!({ "imagem": face_data_url(1) }),
        )
        .await;
        assert_eq!(resp["status"], "sucesso");
        assert_eq!(resp["aluno"], "ana");
        assert!(resp["confianca"].is_i64(), "confianca: {resp}");

        let resp = post_json(
            &fx.state,
            "/reconhecer_foto",
            json!({ "imagem": striped_data_url(1) }),
        )
        .await;
        assert_eq!(resp["status"], "sucesso");
        assert_eq!(resp["aluno"], "bruno");
    }

    #[tokio::test]
    async fn test_get_recognized_name_empty_then_drains() {
        let fx = fixture(Arc::new(WholeFrameLocator));

        let resp = get_json(&fx.state, "/get_recognized_name").await;
        assert_eq!(resp["status"], "erro");
        assert_eq!(resp["mensagem"], "Nenhum aluno reconhecido ainda.");

        let mailbox = Arc::clone(&fx.state.mailbox);
        std::thread::spawn(move || mailbox.publish_blocking("ana".into()))
            .join()
            .unwrap();

        let resp = get_json(&fx.state, "/get_recognized_name").await;
        assert_eq!(resp["status"], "sucesso");
        assert_eq!(resp["aluno"], "ana");

        // Poll drains the slot; the next poll is empty again.
        let resp = get_json(&fx.state, "/get_recognized_name").await;
        assert_eq!(resp["status"], "erro");
    }

    #[tokio::test]
    async fn test_video_feed_without_camera() {
        let fx = fixture(Arc::new(WholeFrameLocator));
        let resp = get_json(&fx.state, "/video_feed").await;
        assert_eq!(resp["status"], "erro");
        assert_eq!(resp["mensagem"], "Câmera indisponível.");
    }
}
