use std::ops::Range;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use regex::Regex;
use unicode_width::UnicodeWidthStr;

use crate::app::{BoardState, ComposeField, ComposeMode, InputMode, SignInField, View};
use crate::filter::FilterSet;
use crate::highlight::{build_highlight_regex, split_highlights};
use crate::model::NoteId;
use crate::registry::TagRegistry;
use crate::render::NoteCard;

const TAG_GAP: &str = " ";

pub fn draw_app(frame: &mut Frame, state: &BoardState, view: &View, list_state: &mut ListState) {
    let area = frame.size();
    let banner_height = u16::from(state.banner().is_some());
    let bordered_tags = area.width >= view.tag_bar_min_width;
    let tag_height = if bordered_tags { 3 } else { 1 };
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(banner_height),
            Constraint::Length(tag_height),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(2),
        ])
        .split(area);

    if let Some(banner) = state.banner() {
        let mut spans = vec![Span::styled(
            format!(" ! {} ", banner.message),
            Style::default()
                .fg(Color::White)
                .bg(Color::Red)
                .add_modifier(Modifier::BOLD),
        )];
        if banner.retry.is_some() {
            spans.push(Span::styled("  r retry", Style::default().fg(Color::Yellow)));
        }
        spans.push(Span::styled("  Esc dismiss", Style::default().fg(Color::Gray)));
        frame.render_widget(Paragraph::new(Line::from(spans)), vertical[0]);
    }

    render_tag_bar(frame, state, view, vertical[1], bordered_tags);
    render_search_line(frame, state, view, vertical[2]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(vertical[3]);

    let highlight_regex = build_highlight_regex(state.query(), state.filters());
    let highlight_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);

    let mut items: Vec<ListItem> = state
        .visible_cards()
        .map(|card| card_item(card, state.filters(), highlight_regex.as_ref(), highlight_style))
        .collect();
    if items.is_empty() {
        let hint = if state.cards().is_empty() {
            "No notes yet. Press `a` to create one."
        } else {
            "No notes match the current filters."
        };
        items.push(ListItem::new(hint));
    }
    let list = List::new(items)
        .block(
            Block::default()
                .title(format!("Notes {}/{}", state.shown_count(), state.cards().len()))
                .borders(Borders::ALL)
                .border_style(focus_style(view.mode == InputMode::Board)),
        )
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, columns[0], list_state);

    render_compose(frame, state, view, columns[1]);

    let status = build_status_line(state, view);
    let status_paragraph = Paragraph::new(status).style(Style::default().fg(Color::Gray));
    frame.render_widget(status_paragraph, vertical[4]);

    if state.user().is_none() {
        render_sign_in(frame, view);
    } else if let InputMode::ConfirmDelete(id) = view.mode {
        render_confirm_delete(frame, state, id);
    }
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn card_item(
    card: &NoteCard,
    filters: &FilterSet,
    regex: Option<&Regex>,
    highlight_style: Style,
) -> ListItem<'static> {
    let mut title_spans = Vec::new();
    if card.editing {
        title_spans.push(Span::styled(
            "✎ ",
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ));
    }
    title_spans.extend(highlight_line(
        &card.title,
        regex,
        highlight_style,
        Style::default().add_modifier(Modifier::BOLD),
    ));

    let mut lines = vec![Line::from(title_spans)];
    if let Some(due) = &card.due_label {
        lines.push(Line::from(Span::styled(
            due.clone(),
            Style::default().fg(Color::Gray),
        )));
    }
    if let Some(tag_line) = render_tag_line(&card.tags, filters) {
        lines.push(tag_line);
    }
    let body = card.display_body();
    if body.is_empty() {
        lines.push(Line::from(""));
    }
    for line in body.lines() {
        lines.push(Line::from(highlight_line(
            line,
            regex,
            highlight_style,
            Style::default(),
        )));
    }
    if !card.expanded && card.body.chars().count() > card.excerpt.chars().count() {
        lines.push(Line::from(Span::styled(
            "… Enter to expand",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines.push(Line::from(""));
    ListItem::new(lines)
}

fn render_tag_bar(frame: &mut Frame, state: &BoardState, view: &View, area: Rect, bordered: bool) {
    let registry = state.registry();
    let block = if bordered {
        Block::default()
            .title("Tags")
            .borders(Borders::ALL)
            .border_style(focus_style(view.mode == InputMode::TagBar))
    } else {
        Block::default()
    };
    let inner_width = if bordered {
        area.width.saturating_sub(2)
    } else {
        area.width
    } as usize;

    if registry.is_empty() {
        let paragraph = Paragraph::new(Span::styled(
            "No tags yet",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let cursor = (view.mode == InputMode::TagBar).then_some(view.tag_cursor);
    let line = tag_bar_line(registry, cursor, inner_width);
    frame.render_widget(Paragraph::new(line).block(block), area);
}

/// One row of registry labels, scrolled so the cursor stays in view.
fn tag_bar_line(registry: &TagRegistry, cursor: Option<usize>, width: usize) -> Line<'static> {
    let labels: Vec<String> = registry.entries().map(|entry| entry.label()).collect();
    let scrolling = registry.needs_scroll(width);
    let available = if scrolling { width.saturating_sub(4) } else { width };
    let widths: Vec<usize> = labels.iter().map(|label| label.width()).collect();
    let range = visible_tag_range(&widths, cursor.unwrap_or(0), available);

    let mut spans = Vec::new();
    if scrolling {
        let marker = if range.start > 0 { "◂ " } else { "  " };
        spans.push(Span::styled(marker, Style::default().fg(Color::DarkGray)));
    }
    for index in range.clone() {
        let Some(entry) = registry.get_index(index) else {
            continue;
        };
        let mut style = if entry.active {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Green)
        };
        if cursor == Some(index) {
            style = style.add_modifier(Modifier::REVERSED);
        }
        if index > range.start {
            spans.push(Span::raw(TAG_GAP));
        }
        spans.push(Span::styled(labels[index].clone(), style));
    }
    if scrolling {
        let marker = if range.end < labels.len() { " ▸" } else { "  " };
        spans.push(Span::styled(marker, Style::default().fg(Color::DarkGray)));
    }
    Line::from(spans)
}

/// Largest run of entries around `cursor` that fits in `available` columns.
/// Always contains the cursor, even when that one label overflows.
fn visible_tag_range(widths: &[usize], cursor: usize, available: usize) -> Range<usize> {
    if widths.is_empty() {
        return 0..0;
    }
    let cursor = cursor.min(widths.len() - 1);
    let gap = TAG_GAP.width();
    let mut start = cursor;
    let mut used = widths[cursor];
    while start > 0 && used + gap + widths[start - 1] <= available {
        start -= 1;
        used += gap + widths[start];
    }
    let mut end = cursor + 1;
    while end < widths.len() && used + gap + widths[end] <= available {
        used += gap + widths[end];
        end += 1;
    }
    start..end
}

fn render_search_line(frame: &mut Frame, state: &BoardState, view: &View, area: Rect) {
    let searching = view.mode == InputMode::Search;
    let line = if searching || !state.query().raw().is_empty() {
        let mut text = state.query().raw().to_string();
        if searching {
            text.push('▌');
        }
        Line::from(vec![
            Span::styled("Search: ", focus_style(searching)),
            Span::raw(text),
        ])
    } else {
        Line::from(Span::styled(
            "Press / to search",
            Style::default().fg(Color::DarkGray),
        ))
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn render_compose(frame: &mut Frame, state: &BoardState, view: &View, area: Rect) {
    let compose = state.compose();
    let active = view.mode == InputMode::Compose;
    let title = match compose.mode() {
        ComposeMode::Idle => "New note".to_string(),
        ComposeMode::Editing(id) => format!("Editing note {id}"),
    };

    let field_line = |field: ComposeField, value: &str| -> Vec<Line<'static>> {
        let focused = active && compose.focus == field;
        let label_style = if focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        let mut lines = vec![Line::from(Span::styled(format!("{field}:"), label_style))];
        let mut value_lines: Vec<String> = value.split('\n').map(str::to_string).collect();
        if focused {
            if let Some(last) = value_lines.last_mut() {
                last.push('▌');
            }
        }
        lines.extend(value_lines.into_iter().map(|line| Line::from(format!("  {line}"))));
        lines
    };

    let mut lines = Vec::new();
    lines.extend(field_line(ComposeField::Title, &compose.title));
    lines.extend(field_line(ComposeField::Content, &compose.content));
    lines.extend(field_line(ComposeField::DueDate, &compose.due_date));
    lines.extend(field_line(ComposeField::Tag, &compose.tag_input));
    if !compose.staged_tags().is_empty() {
        let selected = compose.selected_chip().filter(|_| active);
        let chips = compose.staged_tags().iter().enumerate().flat_map(|(index, tag)| {
            let mut style = Style::default().fg(Color::Green);
            if selected == Some(index) {
                style = style.add_modifier(Modifier::REVERSED);
            }
            [Span::styled(tag.clone(), style), Span::raw(" ")]
        });
        lines.push(Line::from(chips.collect::<Vec<_>>()));
    }
    lines.push(Line::from(""));
    let hint = if active {
        "Tab next field • Enter stages a tag • ←/→ Del drop a tag • Ctrl-s save • Esc cancel"
    } else {
        "a new note • e edit selected"
    };
    lines.push(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))));

    let paragraph = Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(focus_style(active)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn build_status_line(state: &BoardState, view: &View) -> Text<'static> {
    let who = state
        .user()
        .map(|user| user.email.clone())
        .unwrap_or_else(|| "signed out".to_string());
    let mut spans = vec![
        Span::styled(who, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(
            " | Shown: {}/{}",
            state.shown_count(),
            state.cards().len()
        )),
    ];
    if !state.filters().is_empty() {
        let active: Vec<&str> = state.filters().iter().collect();
        spans.push(Span::raw(" | Filters: "));
        spans.push(Span::styled(
            active.join(" "),
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(message) = state.status_message() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.to_string(),
            Style::default().fg(Color::White),
        ));
    }

    let hints = match view.mode {
        InputMode::Board => {
            "j/k move • Enter expand • e edit • d delete • a new • / search • t tags • x clear • Ctrl-r refresh • L sign out • q quit"
        }
        InputMode::TagBar => "←/→ select • Enter/Space toggle • x clear • Esc back",
        InputMode::Search => "type to filter • Enter keep • Esc clear",
        InputMode::Compose => "Ctrl-s save • Esc cancel",
        InputMode::ConfirmDelete(_) => "y delete • n keep",
    };
    Text::from(vec![
        Line::from(spans),
        Line::from(Span::styled(hints, Style::default().fg(Color::DarkGray))),
    ])
}

fn render_sign_in(frame: &mut Frame, view: &View) {
    let form = &view.sign_in;
    let area = centered_rect(60, 40, frame.size());
    frame.render_widget(Clear, area);

    let field = |label: &str, value: String, focused: bool| {
        let mut value = value;
        if focused {
            value.push('▌');
        }
        let style = if focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        Line::from(vec![Span::styled(format!("{label}: "), style), Span::raw(value)])
    };

    let heading = if form.register { "Create account" } else { "Sign in" };
    let mut lines = vec![
        Line::from(Span::styled(
            heading,
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        field(
            "Email",
            form.email.clone(),
            form.field == SignInField::Email,
        ),
        field(
            "Password",
            "•".repeat(form.password.chars().count()),
            form.field == SignInField::Password,
        ),
        Line::from(""),
    ];
    if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    let toggle = if form.register {
        "Ctrl-n sign in instead"
    } else {
        "Ctrl-n create an account"
    };
    lines.push(Line::from(Span::styled(
        format!("Tab switch field • Enter submit • {toggle} • Esc quit"),
        Style::default().fg(Color::Gray),
    )));

    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title(heading)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_confirm_delete(frame: &mut Frame, state: &BoardState, id: NoteId) {
    let area = centered_rect(50, 25, frame.size());
    frame.render_widget(Clear, area);
    let title = state
        .cards()
        .iter()
        .find(|card| card.id == id)
        .map(|card| card.title.clone())
        .unwrap_or_default();
    let paragraph = Paragraph::new(vec![
        Line::from(Span::styled(
            "Delete this note?",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(title),
        Line::from(""),
        Line::from(Span::styled(
            "y to delete • n to keep",
            Style::default().fg(Color::Gray),
        )),
    ])
    .block(
        Block::default()
            .title("Delete Note")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red)),
    )
    .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn highlight_line(
    text: &str,
    regex: Option<&Regex>,
    highlight_style: Style,
    base_style: Style,
) -> Vec<Span<'static>> {
    split_highlights(text, regex)
        .into_iter()
        .map(|(run, matched)| {
            let style = if matched { highlight_style } else { base_style };
            Span::styled(run.to_string(), style)
        })
        .collect()
}

fn render_tag_line(tags: &[String], filters: &FilterSet) -> Option<Line<'static>> {
    if tags.is_empty() {
        return None;
    }
    let mut spans = Vec::new();
    for (idx, tag) in tags.iter().enumerate() {
        let style = if filters.contains(tag) {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Green)
        };
        spans.push(Span::styled(tag.clone(), style));
        if idx + 1 < tags.len() {
            spans.push(Span::raw(" "));
        }
    }
    Some(Line::from(spans))
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
