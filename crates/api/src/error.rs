//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Cart or order service error.
    Domain(DomainError),
    /// Order creation error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::InvalidTransition { .. } => StatusCode::CONFLICT,
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::EmptySelection => StatusCode::BAD_REQUEST,
        SagaError::CatalogUnavailable(_) => StatusCode::BAD_GATEWAY,
        SagaError::StockUnavailable(_) => StatusCode::CONFLICT,
        SagaError::NotFound(_) => StatusCode::NOT_FOUND,
        SagaError::PersistenceFailure(_) | SagaError::OutboxFailure(_) | SagaError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use order_store::OrderStatus;

    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_saga_errors_map_to_statuses() {
        assert_eq!(
            status_of(SagaError::EmptySelection.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::CatalogUnavailable("down".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SagaError::StockUnavailable("none left".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::OutboxFailure("broker".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_domain_errors_map_to_statuses() {
        assert_eq!(
            status_of(
                DomainError::InvalidTransition {
                    from: OrderStatus::TradeClosed,
                    to: OrderStatus::TradeSuccess,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DomainError::Validation("zero".into()).into()),
            StatusCode::BAD_REQUEST
        );
    }
}
