use common::apk::fixtures::{ApkFixture, build_upk};
use reqwest::multipart::Form;

use crate::common::{TestApp, count_files, file_form, file_part, routes};

fn apk_bytes() -> Vec<u8> {
    ApkFixture::default().build()
}

mod package_create {
    use super::*;

    #[tokio::test]
    async fn upload_creates_pending_record() {
        let app = TestApp::spawn().await;
        let bytes = apk_bytes();

        let res = app.upload(7, "app.apk", bytes.clone()).await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["entity_id"], 7);
        assert_eq!(res.body["name"], "app.apk");
        assert_eq!(res.body["alias"], "");
        assert_eq!(res.body["dl_filename"], "app.apk");
        assert_eq!(res.body["parse_status"], "pending");
        assert!(res.body["package_name"].is_null());
        assert_eq!(res.body["filesize"].as_u64().unwrap(), bytes.len() as u64);
        assert_eq!(
            res.body["mime_type"],
            "application/vnd.android.package-archive"
        );
        assert!(res.body["file_url"].is_null());

        let filename = res.body["filename"].as_str().unwrap();
        let (token, basename) = filename
            .strip_prefix("package/7/")
            .and_then(|rest| rest.split_once('_'))
            .expect("stored path should be entity scoped and token prefixed");
        assert_eq!(basename, "app.apk");
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert_eq!(std::fs::read(app.stored_path(filename)).unwrap(), bytes);
    }

    #[tokio::test]
    async fn name_and_alias_are_kept() {
        let app = TestApp::spawn().await;
        let form = file_form("bundle.upk", build_upk(&apk_bytes(), "inner.apk"))
            .text("name", "  Field Notes ")
            .text("alias", "Notes");

        let res = app.post_multipart(routes::PACKAGES, 3, form).await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["name"], "Field Notes");
        assert_eq!(res.body["alias"], "Notes");
        assert_eq!(res.body["dl_filename"], "bundle.upk");
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_paths() {
        let app = TestApp::spawn().await;
        let first = app.upload(1, "app.apk", apk_bytes()).await;
        let second = app.upload(1, "app.apk", apk_bytes()).await;

        assert_eq!(first.status, 201);
        assert_eq!(second.status, 201);
        assert_ne!(first.body["filename"], second.body["filename"]);
        assert_eq!(count_files(&app.entity_dir(1)), 2);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_storage() {
        let app = TestApp::spawn().await;

        for name in ["notes.txt", "app.APK", "app.apk.zip", "apk"] {
            let res = app.upload(5, name, b"payload".to_vec()).await;
            assert_eq!(res.status, 400, "{name} should be rejected");
            assert_eq!(res.body["code"], "VALIDATION_ERROR");
            assert_eq!(res.body["message"], "Only APK and UPK files are allowed");
        }

        assert!(!app.entity_dir(5).exists());
        assert_eq!(app.get(routes::PACKAGES, 5).await.body["total"], 0);
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let app = TestApp::spawn().await;
        let form = Form::new().text("name", "Nothing attached");

        let res = app.post_multipart(routes::PACKAGES, 1, form).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn nameless_file_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.upload(1, "", apk_bytes()).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["message"], "File uploaded without name");
        assert!(!app.entity_dir(1).exists());
    }

    #[tokio::test]
    async fn rejected_field_after_file_removes_stored_file() {
        let app = TestApp::spawn().await;
        let form = file_form("app.apk", apk_bytes()).text("alias", "x".repeat(300));

        let res = app.post_multipart(routes::PACKAGES, 2, form).await;

        assert_eq!(res.status, 400);
        assert_eq!(count_files(&app.entity_dir(2)), 0);
    }

    #[tokio::test]
    async fn second_file_is_rejected() {
        let app = TestApp::spawn().await;
        let form = file_form("a.apk", apk_bytes()).part("file", file_part("b.apk", apk_bytes()));

        let res = app.post_multipart(routes::PACKAGES, 2, form).await;

        assert_eq!(res.status, 400);
        assert_eq!(count_files(&app.entity_dir(2)), 0);
    }

    #[tokio::test]
    async fn missing_entity_header_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.get_without_entity(routes::PACKAGES).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let app = TestApp::spawn_with(|config| config.storage.max_upload_size = 16).await;

        let res = app.upload(1, "big.apk", vec![0u8; 64]).await;

        assert_eq!(res.status, 400);
        assert_eq!(count_files(&app.entity_dir(1)), 0);
    }

    #[tokio::test]
    async fn file_url_uses_deploy_base() {
        let app = TestApp::spawn_with(|config| {
            config.deploy.base_url = Some("https://cdn.example.com/".into());
        })
        .await;

        let res = app.upload(4, "app.apk", apk_bytes()).await;

        let filename = res.body["filename"].as_str().unwrap();
        assert_eq!(
            res.body["file_url"].as_str().unwrap(),
            format!("https://cdn.example.com/{filename}")
        );
    }
}

mod package_staged_upload {
    use super::*;

    #[tokio::test]
    async fn staged_file_is_moved_into_entity_dir() {
        let app = TestApp::spawn().await;
        let bytes = apk_bytes();
        let staged = app.stage("staged.apk", &bytes);

        let form = Form::new().text("_file", "staged.apk");
        let res = app.post_multipart(routes::PACKAGES, 9, form).await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["dl_filename"], "staged.apk");
        assert!(!staged.exists());

        let filename = res.body["filename"].as_str().unwrap();
        assert!(filename.starts_with("package/9/"));
        assert_eq!(std::fs::read(app.stored_path(filename)).unwrap(), bytes);
    }

    #[tokio::test]
    async fn unknown_staged_file_is_rejected() {
        let app = TestApp::spawn().await;
        let form = Form::new().text("_file", "never-staged.apk");

        let res = app.post_multipart(routes::PACKAGES, 9, form).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn staged_name_cannot_escape_upload_dir() {
        let app = TestApp::spawn().await;
        let form = Form::new().text("_file", "../docroot/other.apk");

        let res = app.post_multipart(routes::PACKAGES, 9, form).await;

        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn staged_file_with_wrong_extension_stays_put() {
        let app = TestApp::spawn().await;
        let staged = app.stage("notes.txt", b"hello");
        let form = Form::new().text("_file", "notes.txt");

        let res = app.post_multipart(routes::PACKAGES, 9, form).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["message"], "Only APK and UPK files are allowed");
        assert!(staged.exists());
    }
}

mod package_read {
    use super::*;

    #[tokio::test]
    async fn list_is_scoped_to_entity() {
        let app = TestApp::spawn().await;
        app.create_package(1, "one.apk", apk_bytes()).await;
        app.create_package(1, "two.upk", build_upk(&apk_bytes(), "app.apk"))
            .await;
        app.create_package(2, "other.apk", apk_bytes()).await;

        let res = app.get(routes::PACKAGES, 1).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["total"], 2);
        let names: Vec<&str> = res.body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["dl_filename"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["one.apk", "two.upk"]);
    }

    #[tokio::test]
    async fn get_returns_record() {
        let app = TestApp::spawn().await;
        let id = app.create_package(1, "app.apk", apk_bytes()).await;

        let res = app.get(&routes::package(id), 1).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.id(), id);
        assert_eq!(res.body["dl_filename"], "app.apk");
    }

    #[tokio::test]
    async fn other_entity_sees_not_found() {
        let app = TestApp::spawn().await;
        let id = app.create_package(1, "app.apk", apk_bytes()).await;

        let res = app.get(&routes::package(id), 2).await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn missing_file_reports_zero_size() {
        let app = TestApp::spawn().await;
        let res = app.upload(1, "app.apk", apk_bytes()).await;
        let id = res.id();
        std::fs::remove_file(app.stored_path(res.body["filename"].as_str().unwrap())).unwrap();

        let res = app.get(&routes::package(id), 1).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["filesize"], 0);
        assert_eq!(res.body["mime_type"], "");
    }
}

mod package_update {
    use super::*;

    #[tokio::test]
    async fn replacing_file_removes_old_and_resets_status() {
        let app = TestApp::spawn().await;
        let created = app.upload(1, "app.apk", apk_bytes()).await;
        let id = created.id();
        let old_path = app.stored_path(created.body["filename"].as_str().unwrap());

        let scan = app.run_scanner().await;
        assert_eq!(scan.body["volume"], 1);
        assert_eq!(app.get(&routes::package(id), 1).await.body["parse_status"], "parsed");

        let replacement = ApkFixture {
            version_name: "2.0.0".into(),
            version_code: 200,
            ..Default::default()
        }
        .build();
        let res = app
            .patch_multipart(
                &routes::package(id),
                1,
                file_form("app-v2.apk", replacement.clone()),
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["parse_status"], "pending");
        assert_eq!(res.body["dl_filename"], "app-v2.apk");
        assert!(!old_path.exists());

        let new_path = app.stored_path(res.body["filename"].as_str().unwrap());
        assert_eq!(std::fs::read(new_path).unwrap(), replacement);

        app.run_scanner().await;
        let res = app.get(&routes::package(id), 1).await;
        assert_eq!(res.body["parse_status"], "parsed");
        assert_eq!(res.body["version"], "2.0.0");
        assert_eq!(res.body["version_code"], "200");
    }

    #[tokio::test]
    async fn text_only_update_keeps_file_and_status() {
        let app = TestApp::spawn().await;
        let created = app.upload(1, "app.apk", apk_bytes()).await;
        let id = created.id();
        app.run_scanner().await;

        let form = Form::new().text("name", "Renamed").text("alias", "Short");
        let res = app.patch_multipart(&routes::package(id), 1, form).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["name"], "Renamed");
        assert_eq!(res.body["alias"], "Short");
        assert_eq!(res.body["parse_status"], "parsed");
        assert_eq!(res.body["filename"], created.body["filename"]);
    }

    #[tokio::test]
    async fn rejected_replacement_keeps_original() {
        let app = TestApp::spawn().await;
        let created = app.upload(1, "app.apk", apk_bytes()).await;
        let id = created.id();

        let res = app
            .patch_multipart(&routes::package(id), 1, file_form("app.exe", b"MZ".to_vec()))
            .await;

        assert_eq!(res.status, 400);
        let record = app.record(id).await.unwrap();
        assert_eq!(record.filename, created.body["filename"].as_str().unwrap());
        assert!(app.stored_path(&record.filename).exists());
        assert_eq!(count_files(&app.entity_dir(1)), 1);
    }

    #[tokio::test]
    async fn update_of_other_entity_is_not_found() {
        let app = TestApp::spawn().await;
        let id = app.create_package(1, "app.apk", apk_bytes()).await;

        let res = app
            .patch_multipart(&routes::package(id), 2, file_form("new.apk", apk_bytes()))
            .await;

        assert_eq!(res.status, 404);
        assert_eq!(count_files(&app.entity_dir(2)), 0);
    }
}

mod package_delete {
    use super::*;

    #[tokio::test]
    async fn soft_delete_keeps_file() {
        let app = TestApp::spawn().await;
        let created = app.upload(1, "app.apk", apk_bytes()).await;
        let id = created.id();

        let res = app.delete(&routes::package(id), 1).await;
        assert_eq!(res.status, 204);

        assert_eq!(app.get(&routes::package(id), 1).await.status, 404);
        assert_eq!(app.get(routes::PACKAGES, 1).await.body["total"], 0);

        let record = app.record(id).await.unwrap();
        assert!(record.is_deleted);
        assert!(app.stored_path(&record.filename).exists());
    }

    #[tokio::test]
    async fn force_delete_purges_record_and_file() {
        let app = TestApp::spawn().await;
        let created = app.upload(1, "app.apk", apk_bytes()).await;
        let id = created.id();
        let path = app.stored_path(created.body["filename"].as_str().unwrap());

        let res = app
            .delete(&format!("{}?force=true", routes::package(id)), 1)
            .await;

        assert_eq!(res.status, 204);
        assert!(app.record(id).await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn force_delete_reaches_soft_deleted_records() {
        let app = TestApp::spawn().await;
        let id = app.create_package(1, "app.apk", apk_bytes()).await;
        app.delete(&routes::package(id), 1).await;

        let res = app
            .delete(&format!("{}?force=true", routes::package(id)), 1)
            .await;

        assert_eq!(res.status, 204);
        assert!(app.record(id).await.is_none());
        assert_eq!(count_files(&app.entity_dir(1)), 0);
    }

    #[tokio::test]
    async fn delete_of_other_entity_is_not_found() {
        let app = TestApp::spawn().await;
        let id = app.create_package(1, "app.apk", apk_bytes()).await;

        let res = app
            .delete(&format!("{}?force=true", routes::package(id)), 2)
            .await;

        assert_eq!(res.status, 404);
        assert!(app.record(id).await.is_some());
    }

    #[tokio::test]
    async fn entity_purge_removes_every_package() {
        let app = TestApp::spawn().await;
        app.create_package(1, "a.apk", apk_bytes()).await;
        let deleted = app.create_package(1, "b.apk", apk_bytes()).await;
        app.delete(&routes::package(deleted), 1).await;
        let kept = app.create_package(2, "c.apk", apk_bytes()).await;

        let res = app.delete(&routes::entity_packages(1), 1).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["purged"], 2);
        assert_eq!(count_files(&app.entity_dir(1)), 0);
        assert!(app.record(deleted).await.is_none());
        assert!(app.record(kept).await.is_some());
        assert_eq!(count_files(&app.entity_dir(2)), 1);
    }
}
