use super::handlers::{
    health::{self, Health},
    login, logout, register, session,
    types::{Credentials, MessageResponse, SessionResponse},
};
use utoipa::OpenApi;

/// Add new endpoints here so they show up in `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        register::register,
        login::login,
        logout::logout,
        session::session,
    ),
    components(schemas(Credentials, MessageResponse, SessionResponse, Health)),
    tags(
        (name = "auth", description = "Registration, login and cookie sessions"),
        (name = "health", description = "Liveness and dependency status")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_auth_routes() {
        let doc = openapi();
        for path in ["/health", "/register", "/login", "/logout", "/session"] {
            assert!(doc.paths.paths.contains_key(path), "{path} not documented");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn health_responds_with_single_object() -> anyhow::Result<()> {
        let doc = serde_json::to_value(openapi())?;
        for status in ["200", "503"] {
            let schema = &doc["paths"]["/health"]["get"]["responses"][status]["content"]
                ["application/json"]["schema"];
            assert_eq!(schema["$ref"], "#/components/schemas/Health", "{status}");
            assert!(schema.get("type").is_none(), "{status}");
        }
        Ok(())
    }
}
