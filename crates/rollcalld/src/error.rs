use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-boundary failure taxonomy.
///
/// Every variant is recovered at the route layer and surfaced as
/// `{status: "erro", mensagem}`; none abort the process. Display strings are
/// the wire messages the front end shows verbatim.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Nome do aluno inválido!")]
    InvalidSubjectName,
    #[error("Falha ao decodificar a imagem!")]
    ImageDecodeFailure,
    #[error("Nenhum rosto detectado!")]
    NoFaceDetected,
    #[error("O modelo não foi treinado ainda.")]
    ModelNotTrained,
    #[error("Não foi possível reconhecer o aluno.")]
    NoSubjectRecognized,
    #[error("Nenhum aluno reconhecido ainda.")]
    MailboxEmpty,
    #[error("Nenhuma face foi encontrada para treinamento.")]
    NoTrainingData,
    #[error("Câmera indisponível.")]
    CameraUnavailable,
    #[error("Erro interno do servidor.")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(source) => {
                tracing::error!(error = ?source, "internal error while handling request")
            }
            other => tracing::debug!(mensagem = %other, "request rejected"),
        }
        // The front end keys on the JSON `status` field; the transport
        // status stays 200 across the whole taxonomy.
        (
            StatusCode::OK,
            Json(json!({ "status": "erro", "mensagem": self.to_string() })),
        )
            .into_response()
    }
}
