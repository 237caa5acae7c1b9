use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::config::{ScannerConfig, StorageConfig};
use common::storage::filesystem::FilesystemPackageStore;
use common::upk::ZipUpkTranslator;
use reqwest::Client;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::Value;
use tempfile::TempDir;

use server::config::{
    AppConfig, CorsConfig, DatabaseConfig, DeployConfig, DownloadConfig, ServerConfig,
};
use server::entity::package;
use server::extractors::entity::ENTITY_HEADER;
use server::state::AppState;

pub mod routes {
    pub const PACKAGES: &str = "/api/v1/packages";
    pub const SCANNER_RUN: &str = "/api/v1/scanner/run";

    pub fn package(id: i32) -> String {
        format!("/api/v1/packages/{id}")
    }

    pub fn package_download(id: i32) -> String {
        format!("/api/v1/packages/{id}/download")
    }

    pub fn entity_packages(entity_id: i32) -> String {
        format!("/api/v1/entities/{entity_id}/packages")
    }
}

/// A running test server backed by a scratch SQLite database and document root.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub root: PathBuf,
    pub upload_dir: PathBuf,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Raw response body.
    pub bytes: Vec<u8>,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a tweaked configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dir.path().join("docroot");
        let upload_dir = dir.path().join("staging");
        std::fs::create_dir_all(&upload_dir).expect("Failed to create upload dir");

        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

        let mut app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig::default(),
            },
            database: DatabaseConfig {
                url: db_url.clone(),
            },
            storage: StorageConfig {
                root: root.clone(),
                upload_dir: upload_dir.clone(),
                ..Default::default()
            },
            scanner: ScannerConfig {
                enabled: false,
                ..Default::default()
            },
            download: DownloadConfig::default(),
            deploy: DeployConfig::default(),
        };
        configure(&mut app_config);

        let db = server::database::init_db(&db_url)
            .await
            .expect("Failed to initialize test database");

        let store = FilesystemPackageStore::new(root.clone(), app_config.storage.max_upload_size)
            .await
            .expect("Failed to initialize package store");

        let state = AppState {
            db: db.clone(),
            store: Arc::new(store),
            translator: Arc::new(ZipUpkTranslator::default()),
            config: app_config,
        };

        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            root,
            upload_dir,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str, entity_id: i32) -> TestResponse {
        self.get_with_headers(path, entity_id, &[]).await
    }

    pub async fn get_with_headers(
        &self,
        path: &str,
        entity_id: i32,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut req = self
            .client
            .get(self.url(path))
            .header(ENTITY_HEADER, entity_id.to_string());
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let res = req.send().await.expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_without_entity(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str, entity_id: i32) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .header(ENTITY_HEADER, entity_id.to_string())
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    pub async fn post_multipart(&self, path: &str, entity_id: i32, form: Form) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header(ENTITY_HEADER, entity_id.to_string())
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart POST request");

        TestResponse::from_response(res).await
    }

    pub async fn patch_multipart(&self, path: &str, entity_id: i32, form: Form) -> TestResponse {
        let res = self
            .client
            .patch(self.url(path))
            .header(ENTITY_HEADER, entity_id.to_string())
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart PATCH request");

        TestResponse::from_response(res).await
    }

    /// Upload a package through the `file` field and return the response.
    pub async fn upload(&self, entity_id: i32, file_name: &str, bytes: Vec<u8>) -> TestResponse {
        self.post_multipart(routes::PACKAGES, entity_id, file_form(file_name, bytes))
            .await
    }

    /// Upload a package and return its `id`.
    pub async fn create_package(&self, entity_id: i32, file_name: &str, bytes: Vec<u8>) -> i32 {
        let res = self.upload(entity_id, file_name, bytes).await;
        assert_eq!(res.status, 201, "create_package failed: {}", res.text);
        res.id()
    }

    /// Run one scan batch through the API.
    pub async fn run_scanner(&self) -> TestResponse {
        let res = self
            .client
            .post(self.url(routes::SCANNER_RUN))
            .send()
            .await
            .expect("Failed to send scanner request");

        TestResponse::from_response(res).await
    }

    /// Place a file in the upload directory, as the UI does before submitting `_file`.
    pub fn stage(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.upload_dir.join(name);
        std::fs::write(&path, bytes).expect("Failed to stage upload");
        path
    }

    /// Absolute path of a stored file.
    pub fn stored_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn entity_dir(&self, entity_id: i32) -> PathBuf {
        self.root.join("package").join(entity_id.to_string())
    }

    pub async fn record(&self, id: i32) -> Option<package::Model> {
        package::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .expect("Failed to load package record")
    }
}

/// A form carrying a single `file` part.
pub fn file_form(file_name: &str, bytes: Vec<u8>) -> Form {
    Form::new().part("file", file_part(file_name, bytes))
}

pub fn file_part(file_name: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str("application/octet-stream")
        .expect("Failed to set MIME type")
}

/// Number of regular files below `dir`, zero if it does not exist.
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file())
        .count()
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            bytes,
            text,
            body,
        }
    }

    pub fn id(&self) -> i32 {
        self.body["id"]
            .as_i64()
            .expect("response body should contain 'id'") as i32
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
