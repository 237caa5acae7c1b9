use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use common::ParseStatus;
use common::apk::fixtures::{ApkFixture, build_upk, zip_entries};
use reqwest::multipart::Form;
use sea_orm::{ActiveModelTrait, Set};
use server::entity::package;

use crate::common::{TestApp, file_form, routes};

mod scan_results {
    use super::*;

    #[tokio::test]
    async fn well_formed_apk_is_parsed() {
        let app = TestApp::spawn().await;
        let fixture = ApkFixture::default();
        let id = app.create_package(1, "app.apk", fixture.build()).await;

        let res = app.run_scanner().await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["cron_status"], 1);
        assert_eq!(res.body["volume"], 1);

        let record = app.get(&routes::package(id), 1).await.body;
        assert_eq!(record["parse_status"], "parsed");
        assert_eq!(record["package_name"], "com.example.fixture");
        assert_eq!(record["version"], "1.0.3");
        assert_eq!(record["version_code"], "103");
        assert_eq!(record["alias"], "Fixture App");

        let icon = STANDARD
            .decode(record["icon"].as_str().unwrap())
            .expect("icon should be standard base64");
        assert_eq!(icon, fixture.icon_png);
    }

    #[tokio::test]
    async fn existing_alias_is_kept() {
        let app = TestApp::spawn().await;
        let form = file_form("app.apk", ApkFixture::default().build()).text("alias", "Mine");
        let id = app
            .post_multipart(routes::PACKAGES, 1, form)
            .await
            .id();

        app.run_scanner().await;

        let record = app.record(id).await.unwrap();
        assert_eq!(record.parse_status, ParseStatus::Parsed);
        assert_eq!(record.alias, "Mine");
    }

    #[tokio::test]
    async fn upk_is_unwrapped_and_parsed() {
        let app = TestApp::spawn().await;
        let fixture = ApkFixture {
            package_name: "org.example.wrapped".into(),
            ..Default::default()
        };
        let id = app
            .create_package(1, "bundle.upk", build_upk(&fixture.build(), "payload/App.APK"))
            .await;

        app.run_scanner().await;

        let record = app.record(id).await.unwrap();
        assert_eq!(record.parse_status, ParseStatus::Parsed);
        assert_eq!(record.package_name.as_deref(), Some("org.example.wrapped"));
    }

    #[tokio::test]
    async fn upk_without_apk_fails() {
        let app = TestApp::spawn().await;
        let upk = zip_entries(&[("meta/info.json", b"{}".as_slice())]);
        let id = app.create_package(1, "empty.upk", upk).await;

        let res = app.run_scanner().await;

        assert_eq!(res.body["cron_status"], 1);
        assert_eq!(res.body["volume"], 0);
        let record = app.record(id).await.unwrap();
        assert_eq!(record.parse_status, ParseStatus::Failed);
        assert!(record.package_name.is_none());
    }

    #[tokio::test]
    async fn malformed_apk_stays_pending() {
        let app = TestApp::spawn().await;
        let id = app
            .create_package(1, "broken.apk", b"definitely not a zip".to_vec())
            .await;

        let res = app.run_scanner().await;

        assert_eq!(res.body["cron_status"], 1);
        assert_eq!(res.body["volume"], 0);
        assert_eq!(
            app.record(id).await.unwrap().parse_status,
            ParseStatus::Pending
        );
    }

    #[tokio::test]
    async fn unsupported_extension_is_left_untouched() {
        let app = TestApp::spawn().await;
        let now = Utc::now();
        let inserted = package::ActiveModel {
            entity_id: Set(1),
            name: Set("Notes".into()),
            alias: Set(String::new()),
            filename: Set("package/1/0123456789abcdef0123456789abcdef_notes.txt".into()),
            dl_filename: Set("notes.txt".into()),
            parse_status: Set(ParseStatus::Pending),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&app.db)
        .await
        .unwrap();

        let res = app.run_scanner().await;

        assert_eq!(res.body["volume"], 0);
        let record = app.record(inserted.id).await.unwrap();
        assert_eq!(record.parse_status, ParseStatus::Pending);
        assert_eq!(record.alias, "");
        assert!(record.package_name.is_none());
        assert!(record.version.is_none());
        assert!(record.icon.is_none());
    }
}

mod scan_batches {
    use super::*;

    #[tokio::test]
    async fn batch_size_limits_each_run() {
        let app = TestApp::spawn_with(|config| config.scanner.batch_size = 2).await;
        for name in ["a.apk", "b.apk", "c.apk"] {
            app.create_package(1, name, ApkFixture::default().build())
                .await;
        }

        assert_eq!(app.run_scanner().await.body["volume"], 2);
        assert_eq!(app.run_scanner().await.body["volume"], 1);
        assert_eq!(app.run_scanner().await.body["volume"], 0);
    }

    #[tokio::test]
    async fn deleted_records_are_skipped() {
        let app = TestApp::spawn().await;
        let id = app
            .create_package(1, "app.apk", ApkFixture::default().build())
            .await;
        app.delete(&routes::package(id), 1).await;

        assert_eq!(app.run_scanner().await.body["volume"], 0);
        assert_eq!(
            app.record(id).await.unwrap().parse_status,
            ParseStatus::Pending
        );
    }

    #[tokio::test]
    async fn parsed_records_are_not_rescanned() {
        let app = TestApp::spawn().await;
        app.create_package(1, "app.apk", ApkFixture::default().build())
            .await;

        assert_eq!(app.run_scanner().await.body["volume"], 1);
        assert_eq!(app.run_scanner().await.body["volume"], 0);
    }

    #[tokio::test]
    async fn staged_upload_is_scanned_like_direct_upload() {
        let app = TestApp::spawn().await;
        app.stage("staged.apk", &ApkFixture::default().build());
        let id = app
            .post_multipart(routes::PACKAGES, 1, Form::new().text("_file", "staged.apk"))
            .await
            .id();

        app.run_scanner().await;

        assert_eq!(
            app.record(id).await.unwrap().parse_status,
            ParseStatus::Parsed
        );
    }
}
