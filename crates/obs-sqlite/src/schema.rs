pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE measurement (
  id              INTEGER PRIMARY KEY,
  muid            TEXT NOT NULL UNIQUE,
  description     TEXT NOT NULL,
  host            TEXT NOT NULL,
  start_time      INTEGER NOT NULL,
  end_time        INTEGER
);

CREATE TABLE stage (
  id              INTEGER PRIMARY KEY,
  measurement_id  INTEGER NOT NULL REFERENCES measurement(id),
  stage           INTEGER NOT NULL CHECK (stage >= 1),
  start_time      INTEGER NOT NULL,
  stop_time       INTEGER,
  UNIQUE (measurement_id, stage)
);

CREATE TABLE tld (
  id              INTEGER PRIMARY KEY,
  tld             TEXT NOT NULL UNIQUE
);

CREATE TABLE tld_anon (
  id              INTEGER PRIMARY KEY,
  tld             TEXT NOT NULL UNIQUE,
  tld_id          INTEGER NOT NULL REFERENCES tld(id)
);

CREATE TABLE public_suffix (
  id              INTEGER PRIMARY KEY,
  suffix          TEXT NOT NULL UNIQUE,
  tld_id          INTEGER NOT NULL REFERENCES tld(id)
);

CREATE TABLE public_suffix_anon (
  id                  INTEGER PRIMARY KEY,
  suffix              TEXT NOT NULL UNIQUE,
  public_suffix_id    INTEGER NOT NULL REFERENCES public_suffix(id),
  tld_anon_id         INTEGER NOT NULL REFERENCES tld_anon(id)
);

CREATE TABLE apex (
  id                  INTEGER PRIMARY KEY,
  apex                TEXT NOT NULL UNIQUE,
  tld_id              INTEGER NOT NULL REFERENCES tld(id),
  public_suffix_id    INTEGER NOT NULL REFERENCES public_suffix(id)
);

CREATE TABLE apex_anon (
  id                      INTEGER PRIMARY KEY,
  apex                    TEXT NOT NULL UNIQUE,
  apex_id                 INTEGER NOT NULL REFERENCES apex(id),
  tld_anon_id             INTEGER NOT NULL REFERENCES tld_anon(id),
  public_suffix_anon_id   INTEGER NOT NULL REFERENCES public_suffix_anon(id)
);

CREATE TABLE fqdn (
  id                  INTEGER PRIMARY KEY,
  fqdn                TEXT NOT NULL UNIQUE,
  tld_id              INTEGER NOT NULL REFERENCES tld(id),
  public_suffix_id    INTEGER NOT NULL REFERENCES public_suffix(id),
  apex_id             INTEGER NOT NULL REFERENCES apex(id)
);

CREATE TABLE fqdn_anon (
  id                      INTEGER PRIMARY KEY,
  fqdn                    TEXT NOT NULL UNIQUE,
  fqdn_id                 INTEGER NOT NULL REFERENCES fqdn(id),
  tld_anon_id             INTEGER NOT NULL REFERENCES tld_anon(id),
  public_suffix_anon_id   INTEGER NOT NULL REFERENCES public_suffix_anon(id),
  apex_anon_id            INTEGER NOT NULL REFERENCES apex_anon(id)
);

CREATE TABLE log (
  id              INTEGER PRIMARY KEY,
  url             TEXT NOT NULL UNIQUE,
  description     TEXT NOT NULL
);

CREATE TABLE certificate (
  id                  INTEGER PRIMARY KEY,
  sha256_fingerprint  TEXT NOT NULL UNIQUE,
  raw                 BLOB NOT NULL
);

CREATE TABLE certificate_to_fqdn (
  id              INTEGER PRIMARY KEY,
  certificate_id  INTEGER NOT NULL REFERENCES certificate(id),
  fqdn_id         INTEGER NOT NULL REFERENCES fqdn(id)
);

CREATE TABLE log_entry (
  id              INTEGER PRIMARY KEY,
  idx             INTEGER NOT NULL,
  timestamp       INTEGER NOT NULL,
  is_precert      INTEGER NOT NULL CHECK (is_precert IN (0,1)),
  certificate_id  INTEGER NOT NULL REFERENCES certificate(id),
  log_id          INTEGER NOT NULL REFERENCES log(id),
  stage_id        INTEGER NOT NULL REFERENCES stage(id)
);

CREATE TABLE record_type (
  id              INTEGER PRIMARY KEY,
  type            TEXT NOT NULL UNIQUE
);

CREATE TABLE passive_entry (
  id              INTEGER PRIMARY KEY,
  fqdn_id         INTEGER NOT NULL REFERENCES fqdn(id),
  record_type_id  INTEGER NOT NULL REFERENCES record_type(id),
  first_seen      INTEGER NOT NULL,
  stage_id        INTEGER NOT NULL REFERENCES stage(id),
  UNIQUE (fqdn_id, record_type_id)
);

CREATE TABLE entrada_entry (
  id              INTEGER PRIMARY KEY,
  fqdn_anon_id    INTEGER NOT NULL REFERENCES fqdn_anon(id),
  first_seen      INTEGER NOT NULL,
  last_seen       INTEGER NOT NULL,
  stage_id        INTEGER NOT NULL REFERENCES stage(id)
);

CREATE TABLE zonefile_entry (
  id              INTEGER PRIMARY KEY,
  apex_id         INTEGER NOT NULL REFERENCES apex(id),
  registered      INTEGER NOT NULL DEFAULT 0,
  expired         INTEGER NOT NULL DEFAULT 0,
  first_seen      INTEGER NOT NULL DEFAULT 0,
  stage_id        INTEGER NOT NULL REFERENCES stage(id)
);

CREATE INDEX idx_stage_measurement ON stage(measurement_id);
CREATE INDEX idx_c2f_certificate ON certificate_to_fqdn(certificate_id);
CREATE INDEX idx_c2f_fqdn ON certificate_to_fqdn(fqdn_id);
CREATE INDEX idx_log_entry_stage ON log_entry(stage_id);
CREATE INDEX idx_passive_fqdn ON passive_entry(fqdn_id);
CREATE INDEX idx_entrada_fqdn ON entrada_entry(fqdn_anon_id);
CREATE INDEX idx_zonefile_apex ON zonefile_entry(apex_id);

PRAGMA user_version = 1;

COMMIT;
"#
;

/// Applied in order; `PRAGMA user_version` records how many have run.
pub const MIGRATIONS: &[&str] = &[MIG_0001_INIT];
