use crate::PACKAGES_DB_SCHEMA_VERSION;

/// A table of one of the databases: its name and the SQL that creates it.
/// The creation SQL doubles as the table's schema fingerprint.
pub(crate) struct TableDescriptor {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Data tables of the packages database. Their rows are loaded verbatim from
/// the mirrored CSV files, one file per table.
pub(crate) const DATA_TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        name: "Projects",
        sql: r#"
            CREATE TABLE "Projects" (
                "id" INTEGER NOT NULL,
                "path" TEXT(2048) NOT NULL,
                "type_id" INTEGER NOT NULL,
                "flags" INTEGER NOT NULL,
                PRIMARY KEY ("id")
            );
            CREATE UNIQUE INDEX "ProjectPath" ON "Projects" ("path" ASC);
        "#,
    },
    TableDescriptor {
        name: "ProjectVersions",
        sql: r#"
            CREATE TABLE "ProjectVersions" (
                "id" INTEGER NOT NULL,
                "project_id" INTEGER NOT NULL,
                "major" INTEGER,
                "minor" INTEGER,
                "patch" INTEGER,
                "branch" TEXT,
                "flags" INTEGER NOT NULL,
                "created" DATE NOT NULL,
                "sha256" TEXT NOT NULL,
                PRIMARY KEY ("id"),
                FOREIGN KEY ("project_id") REFERENCES "Projects" ("id")
            );
        "#,
    },
    TableDescriptor {
        name: "ProjectVersionDependencies",
        sql: r#"
            CREATE TABLE "ProjectVersionDependencies" (
                "project_version_id" INTEGER NOT NULL,
                "project_dependency_id" INTEGER NOT NULL,
                "version" TEXT NOT NULL,
                "flags" INTEGER NOT NULL,
                PRIMARY KEY ("project_version_id", "project_dependency_id"),
                FOREIGN KEY ("project_version_id") REFERENCES "ProjectVersions" ("id"),
                FOREIGN KEY ("project_dependency_id") REFERENCES "Projects" ("id")
            );
        "#,
    },
];

/// Tables of the service database. Append new tables at the end only; the
/// creation SQL is hashed to detect schema drift between client versions.
pub(crate) fn service_tables() -> Vec<(String, String)> {
    let mut tables: Vec<(&str, String)> = vec![
        (
            "ClientStamp",
            r#"
            CREATE TABLE "ClientStamp" (
                "stamp" TEXT NOT NULL
            );
        "#
            .to_owned(),
        ),
        (
            "ConfigHashes",
            r#"
            CREATE TABLE "ConfigHashes" (
                "hash" TEXT NOT NULL,
                "config" TEXT NOT NULL,
                "config_hash" TEXT NOT NULL,
                PRIMARY KEY ("hash")
            );
        "#
            .to_owned(),
        ),
        (
            "FileStamps",
            r#"
            CREATE TABLE "FileStamps" (
                "file" TEXT NOT NULL,
                "stamp" INTEGER NOT NULL,
                PRIMARY KEY ("file")
            );
        "#
            .to_owned(),
        ),
        (
            "InstalledPackages",
            r#"
            CREATE TABLE "InstalledPackages" (
                "id" INTEGER NOT NULL,
                "package" TEXT NOT NULL,
                "version" TEXT NOT NULL,
                "hash" TEXT NOT NULL,
                PRIMARY KEY ("id"),
                UNIQUE ("package", "version")
            );
        "#
            .to_owned(),
        ),
        (
            "NextClientVersionCheck",
            r#"
            CREATE TABLE "NextClientVersionCheck" (
                "timestamp" INTEGER NOT NULL
            );
            INSERT INTO NextClientVersionCheck VALUES (0);
        "#
            .to_owned(),
        ),
        (
            "NRuns",
            r#"
            CREATE TABLE "NRuns" (
                "n_runs" INTEGER NOT NULL
            );
            INSERT INTO NRuns VALUES (0);
        "#
            .to_owned(),
        ),
        (
            "PackagesDbSchemaVersion",
            format!(
                r#"
            CREATE TABLE "PackagesDbSchemaVersion" (
                "version" INTEGER NOT NULL
            );
            INSERT INTO PackagesDbSchemaVersion VALUES ({PACKAGES_DB_SCHEMA_VERSION});
        "#
            ),
        ),
        (
            "PackageDependenciesHashes",
            r#"
            CREATE TABLE "PackageDependenciesHashes" (
                "package" TEXT NOT NULL,
                "dependencies" TEXT NOT NULL,
                PRIMARY KEY ("package")
            );
        "#
            .to_owned(),
        ),
        (
            "StartupActions",
            r#"
            CREATE TABLE "StartupActions" (
                "id" INTEGER NOT NULL,
                "action" INTEGER NOT NULL,
                PRIMARY KEY ("id", "action")
            );
        "#
            .to_owned(),
        ),
        (
            "TableHashes",
            r#"
            CREATE TABLE "TableHashes" (
                "tbl" TEXT NOT NULL,
                "hash" TEXT NOT NULL,
                PRIMARY KEY ("tbl")
            );
        "#
            .to_owned(),
        ),
    ];
    tables
        .drain(..)
        .map(|(name, sql)| (name.to_owned(), sql))
        .collect()
}
