//! NFO sidecar generation: the XML description downstream players scan.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use cinedex_model::{CastMember, Movie};

use crate::error::{CoreError, ErrorKind, Result};

/// Everything the sidecar needs beyond the movie row itself.
#[derive(Debug, Clone, Default)]
pub struct NfoInput {
    pub genres: Vec<String>,
    pub cast: Vec<CastMember>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub studios: Vec<String>,
}

/// Render the `<movie>` sidecar document. Output is deterministic for
/// unchanged inputs, which is what makes republishing idempotent.
pub fn render_movie_nfo(movie: &Movie, input: &NfoInput) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(write_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("movie")))
        .map_err(write_err)?;

    write_text_tag(&mut writer, "title", movie.title.as_deref())?;
    write_text_tag(&mut writer, "originaltitle", movie.original_title.as_deref())?;
    write_text_tag(&mut writer, "sorttitle", movie.sort_title.as_deref())?;

    // Primary rating plus the full per-source table.
    if let Some(first) = movie.ratings.first() {
        write_text_tag(&mut writer, "rating", Some(&format_float(first.value)))?;
    }
    if !movie.ratings.is_empty() {
        writer
            .write_event(Event::Start(BytesStart::new("ratings")))
            .map_err(write_err)?;
        for rating in &movie.ratings {
            let mut tag = BytesStart::new("rating");
            tag.push_attribute(("name", rating.source.as_str()));
            tag.push_attribute(("max", "10"));
            writer.write_event(Event::Start(tag)).map_err(write_err)?;
            write_text_tag(&mut writer, "value", Some(&format_float(rating.value)))?;
            if let Some(votes) = rating.votes {
                write_text_tag(&mut writer, "votes", Some(&votes.to_string()))?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("rating")))
                .map_err(write_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("ratings")))
            .map_err(write_err)?;
    }

    write_text_tag(&mut writer, "year", movie.year.map(|y| y.to_string()).as_deref())?;
    write_text_tag(
        &mut writer,
        "premiered",
        movie
            .release_date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .as_deref(),
    )?;
    write_text_tag(&mut writer, "plot", movie.plot.as_deref())?;
    write_text_tag(&mut writer, "tagline", movie.tagline.as_deref())?;
    write_text_tag(
        &mut writer,
        "runtime",
        movie.runtime.map(|minutes| minutes.to_string()).as_deref(),
    )?;
    write_text_tag(&mut writer, "mpaa", movie.content_rating.as_deref())?;

    // External correlation ids.
    if let Some(imdb_id) = movie.external_ids.imdb_id.as_deref() {
        let mut tag = BytesStart::new("uniqueid");
        tag.push_attribute(("type", "imdb"));
        tag.push_attribute(("default", "true"));
        writer.write_event(Event::Start(tag)).map_err(write_err)?;
        writer
            .write_event(Event::Text(BytesText::new(imdb_id)))
            .map_err(write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("uniqueid")))
            .map_err(write_err)?;
        write_text_tag(&mut writer, "id", Some(imdb_id))?;
        write_text_tag(&mut writer, "imdbid", Some(imdb_id))?;
    }
    if let Some(tmdb_id) = movie.external_ids.tmdb_id {
        let mut tag = BytesStart::new("uniqueid");
        tag.push_attribute(("type", "tmdb"));
        writer.write_event(Event::Start(tag)).map_err(write_err)?;
        writer
            .write_event(Event::Text(BytesText::new(&tmdb_id.to_string())))
            .map_err(write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("uniqueid")))
            .map_err(write_err)?;
        write_text_tag(&mut writer, "tmdbid", Some(&tmdb_id.to_string()))?;
    }
    if let Some(tvdb_id) = movie.external_ids.tvdb_id {
        write_text_tag(&mut writer, "tvdbid", Some(&tvdb_id.to_string()))?;
    }

    for genre in &input.genres {
        write_text_tag(&mut writer, "genre", Some(genre))?;
    }
    for studio in &input.studios {
        write_text_tag(&mut writer, "studio", Some(studio))?;
    }
    for director in &input.directors {
        write_text_tag(&mut writer, "director", Some(director))?;
    }
    for writer_name in &input.writers {
        write_text_tag(&mut writer, "credits", Some(writer_name))?;
    }

    for member in &input.cast {
        writer
            .write_event(Event::Start(BytesStart::new("actor")))
            .map_err(write_err)?;
        write_text_tag(&mut writer, "name", Some(&member.name))?;
        write_text_tag(&mut writer, "role", member.role.as_deref())?;
        write_text_tag(&mut writer, "order", Some(&member.order.to_string()))?;
        write_text_tag(&mut writer, "thumb", member.thumb_url.as_deref())?;
        writer
            .write_event(Event::End(BytesEnd::new("actor")))
            .map_err(write_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("movie")))
        .map_err(write_err)?;

    let bytes = writer.into_inner();
    String::from_utf8(bytes)
        .map_err(|err| CoreError::new(ErrorKind::WriteFailed, format!("nfo not utf-8: {err}")))
}

fn write_text_tag<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<&str>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(write_err)?;
    // BytesText escapes & < > " ' on write.
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(write_err)?;
    Ok(())
}

fn format_float(value: f64) -> String {
    format!("{value:.1}")
}

fn write_err<E: std::fmt::Display>(err: E) -> CoreError {
    CoreError::new(ErrorKind::WriteFailed, format!("nfo write: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use cinedex_model::{
        ExternalIds, FieldLocks, LibraryId, MovieId, MovieRating, PersonId, WorkflowState,
    };
    use std::path::PathBuf;

    fn sample_movie() -> Movie {
        Movie {
            id: MovieId(1),
            library_id: LibraryId(1),
            external_ids: ExternalIds {
                tmdb_id: Some(27205),
                imdb_id: Some("tt1375666".into()),
                tvdb_id: None,
            },
            title: Some("Inception".into()),
            original_title: Some("Inception".into()),
            sort_title: Some("Inception".into()),
            year: Some(2010),
            plot: Some("Dreams & \"reality\" <collide>.".into()),
            tagline: Some("Your mind is the scene of the crime.".into()),
            runtime: Some(148),
            content_rating: Some("PG-13".into()),
            release_date: NaiveDate::from_ymd_opt(2010, 7, 16),
            popularity: None,
            budget: None,
            revenue: None,
            language: Some("en".into()),
            status: Some("Released".into()),
            ratings: vec![MovieRating {
                source: "imdb".into(),
                value: 8.8,
                votes: Some(2_000_000),
            }],
            file_path: PathBuf::from("/media/m/Inception (2010)/Inception.mkv"),
            locks: FieldLocks::default(),
            locked_asset_kinds: vec![],
            state: WorkflowState::Enriched,
            monitored: true,
            nfo_parsed_at: None,
            last_enriched_at: None,
            published_at: None,
            published_nfo_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_input() -> NfoInput {
        NfoInput {
            genres: vec!["Action".into(), "Science Fiction".into()],
            cast: vec![CastMember {
                person_id: PersonId(1),
                name: "Leonardo DiCaprio".into(),
                role: Some("Cobb".into()),
                order: 0,
                thumb_url: Some("https://image.tmdb.org/t/p/original/leo.jpg".into()),
                external_person_id: Some(6193),
            }],
            directors: vec!["Christopher Nolan".into()],
            writers: vec!["Christopher Nolan".into()],
            studios: vec!["Legendary Pictures".into()],
        }
    }

    #[test]
    fn renders_expected_tags() {
        let xml = render_movie_nfo(&sample_movie(), &sample_input()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<title>Inception</title>"));
        assert!(xml.contains("<sorttitle>Inception</sorttitle>"));
        assert!(xml.contains("<year>2010</year>"));
        assert!(xml.contains("<premiered>2010-07-16</premiered>"));
        assert!(xml.contains("<runtime>148</runtime>"));
        assert!(xml.contains("<mpaa>PG-13</mpaa>"));
        assert!(xml.contains("<imdbid>tt1375666</imdbid>"));
        assert!(xml.contains("<tmdbid>27205</tmdbid>"));
        assert!(xml.contains("<genre>Action</genre>"));
        assert!(xml.contains("<director>Christopher Nolan</director>"));
        assert!(xml.contains("<credits>Christopher Nolan</credits>"));
        assert!(xml.contains("<studio>Legendary Pictures</studio>"));
        assert!(xml.contains("<name>Leonardo DiCaprio</name>"));
        assert!(xml.contains("<role>Cobb</role>"));
    }

    #[test]
    fn escapes_xml_special_characters() {
        let xml = render_movie_nfo(&sample_movie(), &sample_input()).unwrap();
        assert!(xml.contains("Dreams &amp; &quot;reality&quot; &lt;collide&gt;."));
        assert!(!xml.contains("<collide>"));
    }

    #[test]
    fn output_is_deterministic() {
        let movie = sample_movie();
        let input = sample_input();
        let first = render_movie_nfo(&movie, &input).unwrap();
        let second = render_movie_nfo(&movie, &input).unwrap();
        assert_eq!(first, second);
    }
}
